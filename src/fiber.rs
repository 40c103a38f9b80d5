//! Fibers: stackful execution contexts and the switch primitive.
//!
//! A fiber wraps a `corosensei` coroutine with a pre-allocated, guard-paged
//! stack. Coroutines are asymmetric (resume/suspend pairs), so direct
//! fiber-to-fiber transfer is rendered as a two-step bounce: the switching
//! fiber suspends with the target's handle as the yield value, and the
//! worker thread's dispatch loop immediately resumes that target. No
//! scheduling decision happens in between; the handle carried through the
//! yield *is* the switch.
//!
//! Handles are raw pointers to the boxed fiber state, shared freely between
//! the pool, the wait list and the thread-local hand-off slots. The
//! [`crate::JobSystem`] keeps the owning registry and destroys every fiber
//! at shutdown; a coroutine dropped while suspended has its stack unwound
//! by the library.

use std::cell::Cell;
use std::ptr;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::worker;

/// An opaque reference to a fiber. Copyable; equality is identity.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct FiberHandle(pub(crate) *mut Fiber);

// Handles move between threads through the pool, the wait list and the
// hand-off slots. The rendezvous protocol guarantees a fiber is resumed by
// exactly one thread at a time.
unsafe impl Send for FiberHandle {}
unsafe impl Sync for FiberHandle {}

impl FiberHandle {
    pub(crate) const fn null() -> Self {
        FiberHandle(ptr::null_mut())
    }

    pub(crate) fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

/// Outcome of resuming a fiber, as seen by the dispatch loop.
pub(crate) enum Resumed {
    /// The fiber transferred control to another fiber on this thread.
    SwitchedTo(FiberHandle),
    /// The fiber's worker loop observed shutdown and returned.
    Finished,
}

pub(crate) struct Fiber {
    coroutine: Coroutine<(), FiberHandle, ()>,

    /// Set once, on the coroutine's first resume, and used by [`Fiber::switch`]
    /// to suspend from arbitrarily deep inside the fiber's own call stack.
    /// Valid for as long as the coroutine exists.
    yielder: Cell<*const Yielder<(), FiberHandle>>,
}

unsafe impl Send for Fiber {}

impl Fiber {
    /// Creates a fiber with its own stack of `stack_size` bytes, running
    /// `entry` when first switched to. Returns the owning raw handle; the
    /// caller is responsible for eventually destroying it.
    pub(crate) fn spawn<F>(stack_size: usize, entry: F) -> FiberHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = DefaultStack::new(stack_size).expect("failed to allocate fiber stack");

        let coroutine = Coroutine::with_stack(stack, move |yielder, ()| {
            // Whoever switched to us set the thread's current-fiber slot to
            // our handle first, which is the only way this fiber can learn
            // its own address.
            let me = worker::current_fiber();
            debug_assert!(!me.is_null());
            unsafe {
                (*me.0).yielder.set(yielder as *const _);
            }
            entry();
        });

        FiberHandle(Box::into_raw(Box::new(Fiber {
            coroutine,
            yielder: Cell::new(ptr::null()),
        })))
    }

    /// Resumes `fiber` on the current thread until it switches away or its
    /// worker loop returns.
    ///
    /// # Safety
    ///
    /// `fiber` must be a live handle, and the rendezvous protocol must
    /// guarantee no other thread resumes it concurrently.
    pub(crate) unsafe fn resume(fiber: FiberHandle) -> Resumed {
        let coroutine = &mut (*fiber.0).coroutine;
        match coroutine.resume(()) {
            CoroutineResult::Yield(next) => Resumed::SwitchedTo(next),
            CoroutineResult::Return(()) => Resumed::Finished,
        }
    }

    /// Suspends the fiber identified by `from` (which must be the fiber
    /// executing this call), handing control to `to` on the current thread.
    /// Returns when some completer later switches back into `from`,
    /// possibly on a different thread.
    ///
    /// # Safety
    ///
    /// `from` must be the currently executing fiber; its yielder is only
    /// valid on its own stack.
    pub(crate) unsafe fn switch(from: FiberHandle, to: FiberHandle) {
        let yielder = (*from.0).yielder.get();
        debug_assert!(!yielder.is_null(), "fiber suspended before first entry");
        (*yielder).suspend(to);
    }

    /// Frees the fiber. Suspended fibers have their stacks unwound.
    ///
    /// # Safety
    ///
    /// `fiber` must originate from [`Fiber::spawn`], must not be running,
    /// and must not be used again.
    pub(crate) unsafe fn destroy(fiber: FiberHandle) {
        drop(Box::from_raw(fiber.0));
    }
}
