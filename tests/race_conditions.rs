//! Timing-sensitive paths of the wait/complete rendezvous, run under
//! iteration to give the races a chance to fire.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use weft::{Counter, Job, JobSystem, JobSystemArgs};

fn racing_system() -> JobSystem {
    JobSystem::new(JobSystemArgs {
        num_threads: 2,
        num_fibers: 64,
        fiber_stack_size: 256 * 1024,
        queue_size: 512,
    })
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_wait_before_completion() {
    // The job outlives the waiter's park, so the completer must resume the
    // suspended fiber via the handoff.
    let system = racing_system();
    let resumes = Arc::new(AtomicUsize::new(0));

    let resumes_clone = resumes.clone();
    let bootstrap = Counter::new();
    system.run_jobs(
        vec![Job::new(move |ctx| {
            for _ in 0..20 {
                let flag = Arc::new(AtomicUsize::new(0));
                let job_flag = flag.clone();

                let counter = Counter::new();
                ctx.run_jobs(
                    vec![Job::new(move |_| {
                        thread::sleep(Duration::from_millis(5));
                        job_flag.store(1, Ordering::SeqCst);
                    })],
                    &counter,
                );
                // Reaches the wait list well before the decrement.
                ctx.wait_for_counter(&counter);

                assert_eq!(flag.load(Ordering::SeqCst), 1);
                assert!(counter.is_complete());
                resumes_clone.fetch_add(1, Ordering::SeqCst);
            }
        })],
        &bootstrap,
    );

    wait_until("20 slow joins", || bootstrap.is_complete());
    // Each wait returned exactly once.
    assert_eq!(resumes.load(Ordering::SeqCst), 20);
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_completion_before_wait() {
    // The job finishes before the submitter waits, so the wait takes the
    // fast path or the self-rescind branch and never suspends for long.
    let system = racing_system();

    let bootstrap = Counter::new();
    system.run_jobs(
        vec![Job::new(move |ctx| {
            for _ in 0..20 {
                let counter = Counter::new();
                ctx.run_jobs(vec![Job::new(|_| {})], &counter);

                // Let the other worker finish the trivial job first, so the
                // wait below observes an already-zero counter.
                while !counter.is_complete() {
                    thread::sleep(Duration::from_millis(1));
                }
                ctx.wait_for_counter(&counter);
            }
        })],
        &bootstrap,
    );

    wait_until("20 fast joins", || bootstrap.is_complete());
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_tight_race_between_wait_and_completion() {
    // No deliberate skew: submit and wait back to back, many times, so the
    // counter regularly hits zero between the waiter's park and its
    // switch. Every branch of the rendezvous must funnel to exactly one
    // return per wait.
    let system = racing_system();
    let joins = Arc::new(AtomicUsize::new(0));

    let joins_clone = joins.clone();
    let bootstrap = Counter::new();
    system.run_jobs(
        vec![Job::new(move |ctx| {
            for round in 0..500 {
                let counter = Counter::new();
                let jobs = (0..(round % 3 + 1)).map(|_| Job::new(|_| {})).collect();
                ctx.run_jobs(jobs, &counter);
                ctx.wait_for_counter(&counter);

                assert!(counter.is_complete());
                joins_clone.fetch_add(1, Ordering::SeqCst);
            }
        })],
        &bootstrap,
    );

    wait_until("500 tight joins", || bootstrap.is_complete());
    assert_eq!(joins.load(Ordering::SeqCst), 500);
    system.shutdown().expect("shutdown failed");
}

#[test]
fn test_counter_monotonically_drains() {
    let system = racing_system();

    let bootstrap = Counter::new();
    system.run_jobs(
        vec![Job::new(move |ctx| {
            let counter = Counter::new();
            let jobs = (0..32)
                .map(|_| {
                    Job::new(|_| {
                        thread::sleep(Duration::from_micros(200));
                    })
                })
                .collect();
            ctx.run_jobs(jobs, &counter);

            // Observed values never increase while the batch drains.
            let mut last = counter.value();
            while !counter.is_complete() {
                let now = counter.value();
                assert!(now <= last, "counter went up: {last} -> {now}");
                last = now;
            }

            ctx.wait_for_counter(&counter);
        })],
        &bootstrap,
    );

    wait_until("draining batch", || bootstrap.is_complete());
    system.shutdown().expect("shutdown failed");
}
