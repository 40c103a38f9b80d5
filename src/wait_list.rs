//! The wait list: which fiber is blocked on which counter.
//!
//! The map is keyed by counter identity (the address of its atomic) and
//! holds at most one waiter per counter; a second concurrent waiter on the
//! same counter is a documented caller error. A single spin lock guards the
//! map. Both sides of the rendezvous go through it: the waiter parks itself
//! before suspending, and the completer that drives the counter to zero
//! claims the entry before resuming the waiter. Whichever side takes the
//! lock first wins, and the loser observes either an absent entry or a zero
//! counter, so a wakeup can never be lost.

use std::cell::UnsafeCell;
use std::collections::HashMap;

use crossbeam::utils::CachePadded;

use crate::fiber::FiberHandle;
use crate::spin_lock::SpinLock;

/// Record describing one parked fiber, allocated on the waiter's own stack
/// for the duration of the `wait_for_counter` call frame.
///
/// The private lock is a one-shot barrier, not mutual exclusion over data:
/// the waiter takes it before publishing itself on the wait list and it is
/// released only after the waiter's context switch has completed, by the
/// fiber that replaces the waiter on its thread. A completer that claims
/// this record spins on the lock before resuming the fiber, which is what
/// prevents it from switching to a fiber that is still running.
pub(crate) struct Waiter {
    pub(crate) fiber: FiberHandle,
    pub(crate) lock: SpinLock,
}

impl Waiter {
    pub(crate) fn new(fiber: FiberHandle) -> Self {
        Waiter {
            fiber,
            lock: SpinLock::new(),
        }
    }
}

pub(crate) struct WaitList {
    lock: CachePadded<SpinLock>,
    waiters: UnsafeCell<HashMap<usize, *const Waiter>>,
}

// All map access happens under the lock; the raw record pointers it stores
// are only dereferenced by the claiming completer, which the record's own
// lock synchronizes against the waiter's switch.
unsafe impl Send for WaitList {}
unsafe impl Sync for WaitList {}

impl WaitList {
    pub(crate) fn new() -> Self {
        WaitList {
            lock: CachePadded::new(SpinLock::new()),
            waiters: UnsafeCell::new(HashMap::new()),
        }
    }

    /// Registers `record` as the fiber blocked on the counter identified by
    /// `key`.
    pub(crate) fn park(&self, key: usize, record: *const Waiter) {
        let _guard = self.lock.guard();
        let previous = unsafe { &mut *self.waiters.get() }.insert(key, record);
        debug_assert!(
            previous.is_none(),
            "a counter supports at most one waiter at a time"
        );
    }

    /// Removes and returns the waiter parked on `key`, if any. Used by the
    /// completer to claim the fiber it must resume, and by the waiter
    /// itself to rescind an unnecessary wait.
    pub(crate) fn claim(&self, key: usize) -> Option<*const Waiter> {
        let _guard = self.lock.guard();
        unsafe { &mut *self.waiters.get() }.remove(&key)
    }
}
