//! High-level job system interface.
//!
//! The `JobSystem` is the entry point for scheduling parallel work: it owns
//! the job queue, the fiber pool, the wait list and the pinned worker
//! threads, and exposes the fork/join surface (`run_jobs`,
//! `wait_for_counter`) plus lifecycle control. The wait protocol, the half
//! of the rendezvous executed by the blocking fiber, lives here; the
//! completer's half is in [`crate::worker`].

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crate::counter::Counter;
use crate::fiber::{Fiber, FiberHandle};
use crate::job::Job;
use crate::ring_buffer::RingBuffer;
use crate::wait_list::{WaitList, Waiter};
use crate::worker;

/// Startup configuration.
///
/// The defaults match a desktop-class host: one worker thread per hardware
/// thread, 512 fibers with 512 KiB stacks, and room for 1024 queued jobs.
#[derive(Clone, Debug)]
pub struct JobSystemArgs {
    /// Worker OS threads; each is pinned to a core.
    pub num_threads: usize,
    /// Fibers pre-created into the pool. Must exceed `num_threads`, and
    /// bounds how deeply fork/join waits can nest.
    pub num_fibers: usize,
    /// Stack size per fiber, in bytes.
    pub fiber_stack_size: usize,
    /// Job queue slots; overflowing the queue is a fatal error.
    pub queue_size: usize,
}

impl Default for JobSystemArgs {
    fn default() -> Self {
        JobSystemArgs {
            num_threads: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            num_fibers: 512,
            fiber_stack_size: 512 * 1024,
            queue_size: 1024,
        }
    }
}

/// Scheduler state shared by the worker threads, the fibers and the public
/// API. Boxed by [`JobSystem`] so its address stays stable for the raw
/// references held by threads and fiber entry closures.
pub(crate) struct Scheduler {
    pub(crate) job_queue: RingBuffer<Job>,
    pub(crate) fiber_pool: RingBuffer<FiberHandle>,
    pub(crate) wait_list: WaitList,
    shutdown: AtomicBool,
}

impl Scheduler {
    fn new(args: &JobSystemArgs) -> Self {
        Scheduler {
            job_queue: RingBuffer::new(args.queue_size),
            // One slot above num_fibers so the whole pool can be idle at
            // once despite the ring's sacrificed slot.
            fiber_pool: RingBuffer::new(args.num_fibers + 1),
            wait_list: WaitList::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub(crate) fn run_jobs(&self, jobs: Vec<Job>, counter: &Counter) {
        let Ok(batch) = u32::try_from(jobs.len()) else {
            eprintln!("fatal: job batch exceeds counter range");
            process::abort();
        };

        // Arming the counter must happen before the first enqueue: a worker
        // may pop and complete a job immediately, and its decrement has to
        // land on the batch size, not a stale value.
        counter.set(batch);

        for mut job in jobs {
            job.attach_counter(counter.clone());
            self.job_queue.push_back(job);
        }
    }

    /// Blocks the calling fiber until `counter` reaches zero.
    ///
    /// Either the counter is already zero and the call returns on the fast
    /// path, or the fiber parks itself on the wait list and switches to a
    /// fresh fiber from the pool, to be resumed by the job that completes
    /// the batch. The window where the counter hits zero between parking
    /// and switching is closed by the re-check below and by the record
    /// lock spanning the switch.
    pub(crate) fn wait_for_counter(&self, counter: &Counter) {
        if counter.is_complete() {
            return;
        }

        let me = worker::current_fiber();
        if me.is_null() {
            // Misuse, not a job failure: abort so an enclosing unwind
            // handler cannot swallow it.
            eprintln!("fatal: wait_for_counter called outside a job");
            process::abort();
        }

        let record = Waiter::new(me);
        // Held from before we publish ourselves until the fiber replacing
        // us on this thread runs. A completer that claims the record spins
        // on this lock, which is what stops it from resuming a fiber that
        // has not finished switching away.
        record.lock.lock();

        self.wait_list.park(counter.key(), &record);

        if counter.is_complete() {
            // The batch finished while we were parking. Which side owns
            // the entry decides what happens next.
            if self.wait_list.claim(counter.key()).is_some() {
                // The completer never saw our entry; it already moved on.
                // Rescind the wait and keep running on this thread.
                record.lock.unlock();
                return;
            }
            // The completer claimed our record and is spinning on its
            // lock. Fall through and vacate this thread promptly so it
            // can resume us.
        }

        let Some(fresh) = self.fiber_pool.pop_front() else {
            // Abort, never unwind: the wait list already points at
            // `record`, and unwinding would pop its stack frame while the
            // entry stays parked, leaving a completer to dereference the
            // dead record. Exhaustion is a configuration error in any case.
            eprintln!("fatal: fiber pool exhausted; raise num_fibers or reduce wait nesting");
            process::abort();
        };

        worker::set_current_fiber(fresh);
        // The incoming fiber releases the record lock at the top of its
        // loop, once our switch is architecturally complete. Unlocking
        // before the switch would let the completer resume us while we
        // are still running here.
        worker::stash_waiter_unlock(&record);
        // SAFETY: `me` is the fiber executing this call; `fresh` came from
        // the pool, so nothing else is running it.
        unsafe {
            Fiber::switch(me, fresh);
        }

        // Resumed by the completer, possibly on a different thread. It
        // left its own fiber behind; recycle it.
        let parked = worker::take_pool_return();
        if parked.is_null() {
            eprintln!("fatal: resumed waiter found no fiber to return to the pool");
            process::abort();
        }
        self.fiber_pool.push_back(parked);
    }
}

/// Copyable raw reference to the boxed scheduler, for the worker threads
/// and fiber entry closures. The `JobSystem` joins every thread and
/// destroys every fiber before the box is freed.
#[derive(Clone, Copy)]
struct SchedulerRef(*const Scheduler);

unsafe impl Send for SchedulerRef {}

impl SchedulerRef {
    unsafe fn get(&self) -> &Scheduler {
        &*self.0
    }
}

/// The fiber-based job system.
///
/// Multiplexes a fixed pool of stackful fibers onto worker threads pinned
/// to distinct cores, and synchronizes fork/join batches through atomic
/// counters. A fiber that waits on a counter releases its thread to run
/// more jobs; the job that drives the counter to zero switches directly
/// into the waiter.
pub struct JobSystem {
    scheduler: Box<Scheduler>,
    /// Owning registry of every fiber ever created; all other handles are
    /// copies. Destroyed after the worker threads are joined.
    fibers: Vec<FiberHandle>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

// All shared state is internally synchronized; the raw fiber registry is
// only touched from `Drop`.
unsafe impl Send for JobSystem {}
unsafe impl Sync for JobSystem {}

impl JobSystem {
    /// Builds the system: allocates the fiber pool, then spawns and pins
    /// the worker threads. Workers begin draining the queue immediately.
    pub fn new(args: JobSystemArgs) -> Self {
        assert!(args.num_threads > 0, "at least one worker thread is required");
        assert!(
            args.num_fibers > args.num_threads,
            "num_fibers must exceed num_threads; each worker thread draws its first fiber from the pool"
        );

        let scheduler = Box::new(Scheduler::new(&args));
        let shared = SchedulerRef(&*scheduler);

        let mut fibers = Vec::with_capacity(args.num_fibers);
        for _ in 0..args.num_fibers {
            let handle = Fiber::spawn(args.fiber_stack_size, move || {
                // SAFETY: the scheduler outlives every fiber; see SchedulerRef.
                unsafe { shared.get() }.worker_loop();
            });
            fibers.push(handle);
            scheduler.fiber_pool.push_back(handle);
        }

        let threads = (0..args.num_threads)
            .map(|index| {
                thread::Builder::new()
                    .name(format!("weft-worker-{index}"))
                    .spawn(move || {
                        // SAFETY: threads are joined before the scheduler drops.
                        worker::run_worker_thread(unsafe { shared.get() }, index)
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        log::info!(
            "job system started: {} worker threads, {} fibers, {} KiB stacks, queue of {}",
            args.num_threads,
            args.num_fibers,
            args.fiber_stack_size / 1024,
            args.queue_size
        );

        JobSystem {
            scheduler,
            fibers,
            threads: Mutex::new(threads),
            num_threads: args.num_threads,
        }
    }

    /// Submits a batch of jobs tracked by `counter` and returns
    /// immediately.
    ///
    /// The counter is set to the batch size before any job is enqueued.
    /// The caller must not submit against a counter that still has an
    /// outstanding batch or waiter; a counter is safely reusable once a
    /// wait on it has returned. An empty batch leaves the counter at zero.
    pub fn run_jobs(&self, jobs: Vec<Job>, counter: &Counter) {
        self.scheduler.run_jobs(jobs, counter);
    }

    /// Blocks the calling fiber until `counter` reaches zero.
    ///
    /// Must be called from inside a job: the calling context parks itself
    /// and its worker thread picks up a fresh fiber, so no OS thread is
    /// consumed by the wait. At most one fiber may wait on a given counter
    /// at a time.
    pub fn wait_for_counter(&self, counter: &Counter) {
        self.scheduler.wait_for_counter(counter);
    }

    /// Signals workers to exit after their current work; returns
    /// immediately. Outstanding waits must have been drained by the
    /// caller first.
    pub fn request_shutdown(&self) {
        self.scheduler.request_shutdown();
    }

    /// Waits for all worker threads to exit. They exit once
    /// [`request_shutdown`](Self::request_shutdown) has been called.
    pub fn join(&self) {
        let panicked = self.join_threads();
        if panicked > 0 {
            log::error!("{panicked} worker thread(s) panicked");
        }
    }

    /// Signals shutdown and joins the workers.
    pub fn shutdown(&self) -> Result<(), String> {
        self.request_shutdown();
        let panicked = self.join_threads();
        if panicked > 0 {
            Err(format!("{panicked} worker thread(s) panicked"))
        } else {
            Ok(())
        }
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.num_threads
    }

    /// Fibers currently idle in the pool. Advisory; the answer can change
    /// concurrently.
    pub fn idle_fibers(&self) -> usize {
        self.scheduler.fiber_pool.len()
    }

    /// Jobs currently queued and not yet picked up. Advisory.
    pub fn pending_jobs(&self) -> usize {
        self.scheduler.job_queue.len()
    }

    fn join_threads(&self) -> usize {
        let handles: Vec<_> = {
            let mut threads = self.threads.lock().unwrap();
            threads.drain(..).collect()
        };

        let mut panicked = 0;
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        panicked
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.request_shutdown();
        self.join_threads();

        // Threads are gone; nothing can resume a fiber anymore. Suspended
        // fibers have their stacks unwound as they are destroyed.
        for &fiber in &self.fibers {
            unsafe { Fiber::destroy(fiber) };
        }
        log::debug!("job system shut down, {} fibers destroyed", self.fibers.len());
    }
}
