//! Lifecycle edges: shutdown with no work, with queued work, via drop, and
//! with several systems alive at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use weft::{Counter, Job, JobSystem, JobSystemArgs};

fn tiny_system() -> JobSystem {
    JobSystem::new(JobSystemArgs {
        num_threads: 2,
        num_fibers: 16,
        fiber_stack_size: 128 * 1024,
        queue_size: 64,
    })
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_shutdown_without_jobs() {
    let system = tiny_system();
    assert_eq!(system.num_workers(), 2);
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_shutdown_via_drop() {
    let system = tiny_system();
    let ran = Arc::new(AtomicUsize::new(0));

    let ran_clone = ran.clone();
    let counter = Counter::new();
    system.run_jobs(
        vec![Job::new(move |_| {
            ran_clone.store(1, Ordering::SeqCst);
        })],
        &counter,
    );

    wait_until("lone job", || counter.is_complete());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    // No explicit shutdown; drop signals and joins, then destroys fibers.
    drop(system);
}

#[test]
fn test_shutdown_is_idempotent() {
    let system = tiny_system();
    system.shutdown().expect("first shutdown failed");
    system.shutdown().expect("second shutdown failed");
    system.join();
}

#[test]
fn test_shutdown_with_jobs_still_queued() {
    let system = tiny_system();

    // More slow jobs than the workers can drain before the signal lands;
    // whatever is still queued is discarded when the system drops.
    let counter = Counter::new();
    let jobs = (0..32)
        .map(|_| {
            Job::new(|_| {
                thread::sleep(Duration::from_millis(1));
            })
        })
        .collect();
    system.run_jobs(jobs, &counter);

    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_request_shutdown_from_inside_a_job() {
    let system = tiny_system();

    let counter = Counter::new();
    system.run_jobs(
        vec![Job::new(|ctx| {
            ctx.request_shutdown();
        })],
        &counter,
    );

    // Workers exit on their own once the job has signalled.
    system.join();
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_multiple_systems_coexist() {
    let a = tiny_system();
    let b = tiny_system();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter_a = Counter::new();
    let counter_b = Counter::new();

    for (system, counter) in [(&a, &counter_a), (&b, &counter_b)] {
        let hits = hits.clone();
        system.run_jobs(
            vec![Job::new(move |ctx| {
                let inner = Counter::new();
                let hits2 = hits.clone();
                ctx.run_jobs(
                    vec![Job::new(move |_| {
                        hits2.fetch_add(1, Ordering::SeqCst);
                    })],
                    &inner,
                );
                ctx.wait_for_counter(&inner);
                hits.fetch_add(1, Ordering::SeqCst);
            })],
            counter,
        );
    }

    wait_until("both systems", || {
        counter_a.is_complete() && counter_b.is_complete()
    });
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    a.shutdown().expect("shutdown of a failed");
    b.shutdown().expect("shutdown of b failed");
}
