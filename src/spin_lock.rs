//! Minimal mutual-exclusion primitive for the scheduler's short critical
//! sections.
//!
//! The lock is a single atomic flag with test-and-test-and-set acquisition
//! and a CPU pause hint while spinning. There is no fairness and no
//! reentrancy; critical sections guarded by it are a few dozen instructions.
//! Holders must not switch fibers while holding one, with a single
//! deliberate exception: the waiter record's lock is taken before a context
//! switch and released by the fiber that replaces the waiter on its thread.
//! That cross-context handoff is why `lock` and `unlock` are exposed raw in
//! addition to the scoped [`SpinLock::guard`].

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub(crate) const fn new() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }

    /// Spins until the lock is acquired.
    pub(crate) fn lock(&self) {
        loop {
            // Read-only spin first so contending cores hammer a shared
            // cache line instead of bouncing it with failed exchanges.
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }

            if !self.locked.swap(true, Ordering::Acquire) {
                return;
            }
        }
    }

    pub(crate) fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Acquires the lock for the current scope.
    pub(crate) fn guard(&self) -> SpinLockGuard<'_> {
        self.lock();
        SpinLockGuard { lock: self }
    }
}

pub(crate) struct SpinLockGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_lock_unlock() {
        let lock = SpinLock::new();
        lock.lock();
        lock.unlock();
        lock.lock();
        lock.unlock();
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = SpinLock::new();
        {
            let _guard = lock.guard();
        }
        // Would spin forever if the guard leaked the lock.
        lock.lock();
        lock.unlock();
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = SpinLock::new();
        let counter = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        let _guard = lock.guard();
                        // Non-atomic read-modify-write under the lock; torn
                        // updates would lose increments.
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(counter.load(Ordering::Relaxed), 40_000);
    }
}
