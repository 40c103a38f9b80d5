//! Demo driver: recursive Fibonacci by fork/join, then a batch of
//! compute-heavy sort jobs reusing the same counter.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Instant;

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use weft::{Counter, Job, JobContext, JobSystem, JobSystemArgs, SendPtr};

lazy_static! {
    static ref JOB_SYSTEM: JobSystem = JobSystem::new(JobSystemArgs::default());
}

static FIB_CALLS: AtomicU32 = AtomicU32::new(0);

const NUM_SORT_JOBS: usize = 100;

/// Computes fib(n) in place: reads `n` through `slot`, forks two child jobs
/// that each compute a smaller term into locals of this frame, joins them,
/// and writes the sum back. The join guarantees the children are done
/// before this frame pops.
fn fibonacci(ctx: &JobContext, slot: SendPtr<i32>) {
    let n = unsafe { *slot.get() };

    if n > 1 {
        let mut minus_one = n - 1;
        let mut minus_two = n - 2;
        let a = SendPtr::new(&mut minus_one);
        let b = SendPtr::new(&mut minus_two);

        let counter = Counter::new();
        ctx.run_jobs(
            vec![
                Job::new(move |ctx| fibonacci(ctx, a)),
                Job::new(move |ctx| fibonacci(ctx, b)),
            ],
            &counter,
        );
        ctx.wait_for_counter(&counter);

        unsafe {
            *slot.get() = minus_one + minus_two;
        }
    }

    FIB_CALLS.fetch_add(1, Ordering::Relaxed);
}

/// A deliberately expensive job: fill a vector with seeded random doubles,
/// run a quadratic trig pass over it, then sort.
fn vector_sort(_ctx: &JobContext) {
    let mut rng = StdRng::seed_from_u64(383628);
    let mut data: Vec<f64> = (0..900).map(|_| rng.gen::<f64>()).collect();

    for i in 0..data.len() {
        let mut sum = 0.0;
        for j in 0..data.len() {
            sum += data[j].sin() * data[(i + j) % data.len()].cos();
        }
        data[i] = sum.abs().exp();
    }

    data.sort_by(f64::total_cmp);
}

/// The application's entry job. Runs the workloads, reports timings, and
/// signals shutdown so `main` can join the workers.
fn entry(ctx: &JobContext) {
    let start = Instant::now();

    let mut fib_input = 13i32;
    let slot = SendPtr::new(&mut fib_input);
    FIB_CALLS.store(0, Ordering::Relaxed);

    let counter = Counter::new();
    ctx.run_jobs(vec![Job::new(move |ctx| fibonacci(ctx, slot))], &counter);
    ctx.wait_for_counter(&counter);

    println!(
        "fibonacci job done: fib(13) = {} in {} invocations",
        fib_input,
        FIB_CALLS.load(Ordering::Relaxed)
    );

    // A counter is reusable once a wait on it has returned.
    let sorts: Vec<Job> = (0..NUM_SORT_JOBS).map(|_| Job::new(vector_sort)).collect();
    ctx.run_jobs(sorts, &counter);
    ctx.wait_for_counter(&counter);

    println!(
        "{} sort jobs done, {} outstanding",
        NUM_SORT_JOBS,
        counter.value()
    );
    println!("run time: {} ms", start.elapsed().as_millis());

    ctx.request_shutdown();
}

fn main() {
    env_logger::init();

    println!(
        "running with {} hardware threads",
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    );

    let bootstrap = Counter::new();
    JOB_SYSTEM.run_jobs(vec![Job::new(entry)], &bootstrap);

    // The entry job requests shutdown when it is done; wait for the
    // workers to drain and exit.
    JOB_SYSTEM.join();
}
