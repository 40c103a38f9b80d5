//! Worker threads and the per-fiber worker loop.
//!
//! Each worker OS thread is pinned to a core and runs a dispatch loop at its
//! base: it resumes one fiber at a time and follows whatever handle that
//! fiber yields when it switches away. Every fiber runs [`Scheduler::worker_loop`],
//! draining the job queue and, when a completed job drives its counter to
//! zero, performing the completion handoff that resumes the parked waiter.
//!
//! Three thread-local slots carry information across a context switch,
//! because state that must outlive the switch cannot live on either fiber's
//! stack:
//!
//! - `CURRENT_FIBER`: which fiber is presently running on this thread. Set
//!   by whichever side initiates a switch, before the switch.
//! - `UNLOCK_AFTER_SWITCH`: a waiter's record whose lock must be released
//!   only once the waiter has fully vacated this thread. The incoming fiber
//!   releases it at the top of its loop.
//! - `RETURN_TO_POOL`: the handle a completer leaves behind when it switches
//!   into a waiter; the resumed waiter recycles it into the fiber pool.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr;

use crossbeam::utils::Backoff;

use crate::context::JobContext;
use crate::counter::Counter;
use crate::fiber::{Fiber, FiberHandle, Resumed};
use crate::job::Job;
use crate::job_system::Scheduler;
use crate::wait_list::Waiter;

thread_local! {
    static CURRENT_FIBER: Cell<FiberHandle> = const { Cell::new(FiberHandle::null()) };
    static UNLOCK_AFTER_SWITCH: Cell<*const Waiter> = const { Cell::new(ptr::null()) };
    static RETURN_TO_POOL: Cell<FiberHandle> = const { Cell::new(FiberHandle::null()) };
}

pub(crate) fn current_fiber() -> FiberHandle {
    CURRENT_FIBER.with(|slot| slot.get())
}

pub(crate) fn set_current_fiber(fiber: FiberHandle) {
    CURRENT_FIBER.with(|slot| slot.set(fiber));
}

/// Arranges for `record`'s lock to be released by the next fiber that runs
/// on this thread.
pub(crate) fn stash_waiter_unlock(record: *const Waiter) {
    UNLOCK_AFTER_SWITCH.with(|slot| {
        debug_assert!(slot.get().is_null());
        slot.set(record);
    });
}

fn take_waiter_unlock() -> *const Waiter {
    UNLOCK_AFTER_SWITCH.with(|slot| slot.replace(ptr::null()))
}

/// Leaves `fiber` behind for the waiter this thread is about to resume.
fn stash_pool_return(fiber: FiberHandle) {
    RETURN_TO_POOL.with(|slot| {
        debug_assert!(slot.get().is_null());
        slot.set(fiber);
    });
}

pub(crate) fn take_pool_return() -> FiberHandle {
    RETURN_TO_POOL.with(|slot| slot.replace(FiberHandle::null()))
}

fn pool_return_is_empty() -> bool {
    RETURN_TO_POOL.with(|slot| slot.get().is_null())
}

/// Entry point of each worker OS thread: pin to a core, draw a first fiber
/// from the pool, then dispatch until the running fiber's loop returns.
pub(crate) fn run_worker_thread(scheduler: &Scheduler, index: usize) {
    pin_to_core(index);

    let Some(first) = scheduler.fiber_pool.pop_front() else {
        eprintln!("fatal: fiber pool exhausted at startup; num_fibers must exceed num_threads");
        process::abort();
    };
    set_current_fiber(first);

    let mut current = first;
    loop {
        // SAFETY: the rendezvous protocol hands each fiber to exactly one
        // thread at a time; `current` was either drawn from the pool or
        // yielded to us by the previous fiber.
        match unsafe { Fiber::resume(current) } {
            Resumed::SwitchedTo(next) => current = next,
            Resumed::Finished => break,
        }
    }

    set_current_fiber(FiberHandle::null());
    log::debug!("worker {index} exited");
}

fn pin_to_core(index: usize) {
    let cores = match core_affinity::get_core_ids() {
        Some(cores) if !cores.is_empty() => cores,
        _ => {
            eprintln!("fatal: no CPU cores reported for affinity");
            process::abort();
        }
    };

    let core = cores[index % cores.len()];
    if !core_affinity::set_for_current(core) {
        eprintln!("fatal: failed to pin worker thread to core {}", core.id);
        process::abort();
    }
    log::debug!("worker {index} pinned to core {}", core.id);
}

impl Scheduler {
    /// The loop every fiber runs when it is not executing a user job.
    pub(crate) fn worker_loop(&self) {
        let backoff = Backoff::new();
        loop {
            // The previous fiber on this thread may have parked itself on
            // the wait list; its record lock is released here, after its
            // switch away is architecturally complete. Must run before the
            // shutdown check so a spinning completer is never stranded.
            release_parked_waiter();

            if self.is_shutting_down() {
                return;
            }

            match self.job_queue.pop_front() {
                Some(job) => {
                    backoff.reset();
                    self.execute(job);
                }
                None => backoff.snooze(),
            }
        }
    }

    fn execute(&self, job: Job) {
        let (work, counter) = job.into_parts();

        let context = JobContext::new(self);
        // Unwind isolation covers the job body only. Scheduler-fatal
        // conditions reachable through the context (queue overflow in a
        // nested run_jobs, fiber-pool exhaustion or off-fiber misuse in
        // wait_for_counter) abort the process and never unwind to here.
        if let Err(err) = panic::catch_unwind(AssertUnwindSafe(|| work(&context))) {
            let msg = if let Some(s) = err.downcast_ref::<&str>() {
                *s
            } else if let Some(s) = err.downcast_ref::<String>() {
                s.as_str()
            } else {
                "unknown panic payload"
            };
            log::error!("job panicked: {msg}");
        }

        // A panicked job still counts as completed; a waiter must not be
        // stranded on a counter that can no longer reach zero.
        if let Some(counter) = counter {
            if counter.decrement() == 0 {
                self.complete(&counter);
            }
        }
    }

    /// Completion handoff, run by the fiber whose decrement drove `counter`
    /// to zero: claim the waiter parked on it, if any, and switch into it.
    fn complete(&self, counter: &Counter) {
        let Some(record) = self.wait_list.claim(counter.key()) else {
            // Either no one is waiting yet, or the waiter noticed the zero
            // counter and rescinded, or it is about to notice the missing
            // entry was never there and return without switching. All
            // benign; the waiter side resolves it.
            return;
        };
        // The wait-list lock is already released here; holding it while
        // spinning on the record lock below would deadlock against other
        // completers working on other counters.

        unsafe {
            // The waiter published itself before it switched away, so it
            // may still be running on its original thread. Its record lock
            // is held from before publication until the fiber replacing it
            // runs; bouncing through it here means the waiter has vacated.
            (*record).lock.lock();
            (*record).lock.unlock();

            let target = (*record).fiber;
            debug_assert!(!target.is_null());

            let me = current_fiber();
            debug_assert!(!me.is_null());

            // The resumed waiter recycles this fiber into the pool.
            stash_pool_return(me);
            set_current_fiber(target);
            Fiber::switch(me, target);
        }

        // Back on some thread because a later waiter drew this fiber from
        // the pool and switched to it. That waiter left its record in the
        // unlock slot, not a fiber in the pool-return slot.
        debug_assert!(pool_return_is_empty());
    }
}

fn release_parked_waiter() {
    let record = take_waiter_unlock();
    if !record.is_null() {
        // SAFETY: the record lives on the parked waiter's stack, which
        // stays intact until a completer resumes it; the completer cannot
        // get that far before this unlock.
        unsafe {
            (*record).lock.unlock();
        }
    }
}
