//! Job descriptors.
//!
//! A job is a unit of work submitted to the scheduler: a closure plus the
//! counter it reports completion to. The counter is installed by
//! [`crate::JobSystem::run_jobs`] when the batch is armed; the queue stores
//! jobs by value.

use crate::context::JobContext;
use crate::counter::Counter;

/// A unit of work to be executed by a worker fiber.
///
/// The closure receives a [`JobContext`] through which it can submit nested
/// batches and wait on counters, which is how recursive fork/join is
/// expressed.
pub struct Job {
    work: Box<dyn FnOnce(&JobContext) + Send + 'static>,
    counter: Option<Counter>,
}

impl Job {
    /// Creates a job from a closure.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&JobContext) + Send + 'static,
    {
        Job {
            work: Box::new(work),
            counter: None,
        }
    }

    /// Installs the completion counter. Called once per job while a batch
    /// is being submitted.
    pub(crate) fn attach_counter(&mut self, counter: Counter) {
        debug_assert!(self.counter.is_none(), "job already belongs to a batch");
        self.counter = Some(counter);
    }

    pub(crate) fn into_parts(self) -> (Box<dyn FnOnce(&JobContext) + Send + 'static>, Option<Counter>) {
        (self.work, self.counter)
    }
}

/// A copyable wrapper that lets a raw pointer cross into a job closure.
///
/// Jobs are `'static`, so a parent that wants children to write results into
/// its stack frame cannot lend references into them. `SendPtr` carries the
/// pointer instead; the fork/join counter provides the happens-before edge
/// that makes the parent's later read safe. The caller is responsible for
/// keeping the pointee alive until the batch completes, which waiting on
/// the batch counter guarantees.
pub struct SendPtr<T>(*mut T);

unsafe impl<T> Send for SendPtr<T> {}

impl<T> SendPtr<T> {
    pub fn new(ptr: *mut T) -> Self {
        SendPtr(ptr)
    }

    pub fn get(&self) -> *mut T {
        self.0
    }
}

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}
