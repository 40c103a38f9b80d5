//! Counter-based synchronization for job completion tracking.
//!
//! A counter is the fork/join rendezvous point: [`crate::JobSystem::run_jobs`]
//! sets it to the batch size, every completed job decrements it once, and a
//! fiber may block on it reaching zero. The atomic's heap address identifies
//! the counter in the scheduler's wait list, so clones of one handle all
//! name the same wait.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A thread-safe counter tracking the number of incomplete jobs in a batch.
///
/// Counters start at zero and are armed by `run_jobs`. A counter may be
/// reused for a new batch once a wait on it has returned.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<AtomicU32>,
}

impl Counter {
    /// Creates a counter with no outstanding jobs.
    pub fn new() -> Self {
        Counter {
            inner: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Returns the number of jobs still outstanding.
    pub fn value(&self) -> u32 {
        self.inner.load(Ordering::SeqCst)
    }

    /// Checks whether all tracked jobs have completed.
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }

    /// Arms the counter with the batch size. Must happen before the batch
    /// is enqueued so no job can complete against an unarmed counter.
    pub(crate) fn set(&self, value: u32) {
        self.inner.store(value, Ordering::SeqCst);
    }

    /// Decrements by one and returns the new value.
    pub(crate) fn decrement(&self) -> u32 {
        let prev = self.inner.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "counter decremented past zero");
        prev - 1
    }

    /// The counter's identity in the wait list.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::new()
    }
}
