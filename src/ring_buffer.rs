//! Bounded multi-producer multi-consumer FIFO over a fixed slot array.
//!
//! Producers are serialized by one spin lock and consumers by another, so a
//! producer and a consumer can make progress concurrently. Head and tail are
//! atomics so that a half-published element can never become visible through
//! store/load reordering; the locks alone would not order the index updates
//! against the slot writes for the opposite side. One slot is sacrificed to
//! distinguish full from empty: the buffer is empty when `head == tail` and
//! full when advancing `head` would collide with `tail`.
//!
//! Overflow is a configuration error, not a runtime condition, and aborts
//! the process. The fiber pool and the job queue are the two instances.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

use crate::spin_lock::SpinLock;

pub(crate) struct RingBuffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    capacity: usize,

    producer_lock: CachePadded<SpinLock>,
    consumer_lock: CachePadded<SpinLock>,

    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

// The locks serialize slot access per side and the atomic indices publish
// slot contents between sides, so the buffer is safe to share as long as
// the element type can move between threads.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Creates a buffer with `capacity` slots, of which `capacity - 1` are
    /// usable.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring buffer capacity must be at least 2");

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        RingBuffer {
            slots,
            capacity,
            producer_lock: CachePadded::new(SpinLock::new()),
            consumer_lock: CachePadded::new(SpinLock::new()),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Appends a value. Aborts if the buffer is full; callers size the
    /// buffer so that overflow cannot happen in a correct program.
    pub(crate) fn push_back(&self, value: T) {
        let _guard = self.producer_lock.guard();

        let head = self.head.load(Ordering::Acquire);
        let next = (head + 1) % self.capacity;
        if next == self.tail.load(Ordering::Acquire) {
            // Abort rather than panic: pushes happen from inside jobs,
            // and the per-job unwind isolation must not be able to
            // mistake a misconfigured queue for a failed job.
            eprintln!("fatal: ring buffer overflow (capacity {})", self.capacity - 1);
            process::abort();
        }

        unsafe {
            (*self.slots[head].get()).write(value);
        }
        // Publishes the slot write; a consumer that observes the new head
        // also observes the element.
        self.head.store(next, Ordering::Release);
    }

    /// Removes and returns the oldest value, or `None` if empty. The empty
    /// check runs without taking the consumer lock.
    pub(crate) fn pop_front(&self) -> Option<T> {
        if self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire) {
            return None;
        }

        let _guard = self.consumer_lock.guard();

        let tail = self.tail.load(Ordering::Acquire);
        if self.head.load(Ordering::Acquire) == tail {
            return None;
        }

        let value = unsafe { (*self.slots[tail].get()).assume_init_read() };
        self.tail.store((tail + 1) % self.capacity, Ordering::Release);
        Some(value)
    }

    /// Number of elements currently buffered. Advisory: concurrent pushes
    /// and pops can change the answer before it is returned.
    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + self.capacity - tail) % self.capacity
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.pop_front().is_some() {}
    }
}
