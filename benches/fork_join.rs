//! Fork/join dispatch throughput.

use std::hint;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use weft::{Counter, Job, JobSystem, JobSystemArgs};

fn bench_fork_join(c: &mut Criterion) {
    let system = JobSystem::new(JobSystemArgs {
        num_threads: 4,
        num_fibers: 256,
        fiber_stack_size: 256 * 1024,
        queue_size: 2048,
    });

    c.bench_function("fork_join_100_trivial_jobs", |b| {
        b.iter(|| {
            let bootstrap = Counter::new();
            system.run_jobs(
                vec![Job::new(move |ctx| {
                    let batch = Counter::new();
                    let jobs = (0..100)
                        .map(|i: u64| Job::new(move |_| {
                            black_box(i.wrapping_mul(i));
                        }))
                        .collect();
                    ctx.run_jobs(jobs, &batch);
                    ctx.wait_for_counter(&batch);
                })],
                &bootstrap,
            );
            while !bootstrap.is_complete() {
                hint::spin_loop();
            }
        })
    });

    c.bench_function("fork_join_nested_depth_8", |b| {
        b.iter(|| {
            let bootstrap = Counter::new();
            system.run_jobs(
                vec![Job::new(move |ctx| {
                    fn descend(ctx: &weft::JobContext, depth: usize) {
                        if depth == 0 {
                            return;
                        }
                        let counter = Counter::new();
                        ctx.run_jobs(
                            vec![Job::new(move |ctx| descend(ctx, depth - 1))],
                            &counter,
                        );
                        ctx.wait_for_counter(&counter);
                    }
                    descend(ctx, 8);
                })],
                &bootstrap,
            );
            while !bootstrap.is_complete() {
                hint::spin_loop();
            }
        })
    });

    system.shutdown().expect("shutdown failed");
}

criterion_group!(benches, bench_fork_join);
criterion_main!(benches);
