//! # weft - Fiber-Based Job System
//!
//! An in-process work scheduler that multiplexes a bounded pool of
//! user-space stackful coroutines (fibers) onto a fixed set of OS threads
//! pinned to distinct cores, synchronizing fork/join batches through shared
//! atomic counters. Application code submits N independent jobs and blocks
//! the calling fiber until all N complete, without consuming an OS thread
//! per outstanding wait.
//!
//! ## Architecture
//!
//! - **Fibers**: stackful execution contexts, created once at startup and
//!   recycled through a pool.
//! - **Job queue**: bounded MPMC ring buffer of pending jobs.
//! - **Counters**: atomic fork/join rendezvous points.
//! - **Worker threads**: pinned OS threads, each dispatching one fiber at
//!   a time.
//!
//! A fiber that waits on a counter parks itself on a wait list and hands
//! its thread a fresh fiber from the pool; the job that drives the counter
//! to zero switches directly into the waiter. The handoff is race-free even
//! when the counter reaches zero between the waiter's check and its context
//! switch.
//!
//! ## Example
//!
//! ```no_run
//! use weft::{Counter, Job, JobSystem, JobSystemArgs};
//!
//! let system = JobSystem::new(JobSystemArgs::default());
//!
//! let bootstrap = Counter::new();
//! system.run_jobs(
//!     vec![Job::new(|ctx| {
//!         let batch = Counter::new();
//!         ctx.run_jobs(
//!             (0..8).map(|i| Job::new(move |_| println!("job {i}"))).collect(),
//!             &batch,
//!         );
//!         ctx.wait_for_counter(&batch);
//!         ctx.request_shutdown();
//!     })],
//!     &bootstrap,
//! );
//!
//! system.join();
//! ```

pub mod context;
pub mod counter;
pub mod job;
pub mod job_system;

mod fiber;
mod ring_buffer;
mod spin_lock;
mod wait_list;
mod worker;

pub use context::JobContext;
pub use counter::Counter;
pub use job::{Job, SendPtr};
pub use job_system::{JobSystem, JobSystemArgs};
