//! In-job handle to the scheduler.
//!
//! Every job closure receives a [`JobContext`], which is how work running
//! inside a fiber reaches back into the system: submitting nested batches,
//! blocking on a counter, or signalling shutdown from the application's
//! entry job. The context borrows the scheduler for the duration of the job
//! invocation, so jobs never need a `'static` reference to the system that
//! runs them.

use crate::counter::Counter;
use crate::job::Job;
use crate::job_system::Scheduler;

/// Capabilities available to code running inside a job.
pub struct JobContext<'a> {
    scheduler: &'a Scheduler,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(scheduler: &'a Scheduler) -> Self {
        JobContext { scheduler }
    }

    /// Submits a batch of jobs tracked by `counter`. Fire-and-forget; see
    /// [`crate::JobSystem::run_jobs`].
    pub fn run_jobs(&self, jobs: Vec<Job>, counter: &Counter) {
        self.scheduler.run_jobs(jobs, counter);
    }

    /// Blocks the calling fiber until `counter` reaches zero, releasing
    /// this worker thread to run other jobs in the meantime. See
    /// [`crate::JobSystem::wait_for_counter`].
    pub fn wait_for_counter(&self, counter: &Counter) {
        self.scheduler.wait_for_counter(counter);
    }

    /// Signals the worker threads to exit once their current work is done.
    /// Returns immediately; intended for the application's entry job.
    pub fn request_shutdown(&self) {
        self.scheduler.request_shutdown();
    }
}
