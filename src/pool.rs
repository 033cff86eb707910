//! Work-stealing thread pool.
//!
//! # Architecture
//!
//! ```text
//!   submitter (&mut ThreadPool)
//!      │ round-robin
//!      ▼
//!  ┌────────────┬────────────┬────────────┐
//!  │  slot 0    │  slot 1    │  slot N-1  │   per-worker slot:
//!  │ sem  deque │ sem  deque │ sem  deque │   Semaphore + Chase-Lev deque
//!  └─────┬──────┴─────┬──────┴─────┬──────┘
//!        │            │            │
//!     worker 0 ◄── steal ──► worker N-1       workers steal from any slot
//! ```
//!
//! Submission pushes the task onto one worker's deque (the submitter is
//! the deque's single producer) and releases that worker's semaphore.
//! Workers drain their own deque first and steal from random victims when
//! it runs dry, spinning while the global in-flight count says work exists
//! anywhere, then block on their semaphore.
//!
//! # Quiescence
//!
//! `in_flight` counts tasks that are enqueued but not yet dequeued-for-run:
//! submit increments, a successful steal decrements with Release (plus an
//! Acquire fence on the final decrement). A worker that reads zero with
//! Acquire therefore observes the side effects of every drained task, and
//! goes back to sleep.
//!
//! # Shutdown
//!
//! Drop sets each worker's stop flag, releases each semaphore once so
//! every sleeper wakes, and joins. Workers re-check the flag only after
//! the inner loop exits (in-flight hit zero), so everything submitted
//! before drop still runs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_utils::CachePadded;

use crate::deque::{self, Stealer};
use crate::oneshot::{self, JoinHandle};
use crate::rng::Xoroshiro128;
use crate::semaphore::{Semaphore, DEFAULT_SPIN};

/// A submitted unit of work, already bound to its result channel.
type Task = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// Configuration
// ============================================================================

/// Thread pool configuration.
///
/// The spin constants are scheduling heuristics, not correctness knobs;
/// the defaults were tuned for short tasks on commodity hardware. Profile
/// with your workload before changing them.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,

    /// Seed for the victim-selection RNG. Worker `i` uses the seeded
    /// stream jumped ahead `i` times, so streams never overlap.
    pub seed: u64,

    /// Inner-loop iterations a freshly woken worker prefers its own deque
    /// before it starts picking random victims.
    pub spin_budget: u32,

    /// User-space spin iterations in [`Semaphore::acquire_many`] before a
    /// worker parks in the kernel.
    pub semaphore_spin: u32,

    /// Initial per-worker ring capacity. Must be a power of two; rings
    /// double on demand and never shrink.
    pub deque_capacity: usize,
}

impl PoolConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
        assert!(
            self.deque_capacity > 0 && self.deque_capacity.is_power_of_two(),
            "deque_capacity must be a nonzero power of two, got {}",
            self.deque_capacity
        );
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, usize::from),
            seed: 0x853c_49e6_748f_ea9b,
            spin_budget: 100,
            semaphore_spin: DEFAULT_SPIN,
            deque_capacity: deque::DEFAULT_CAPACITY,
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// One worker's mailbox: wakeup semaphore, thief handle onto its deque,
/// and its stop flag.
struct WorkerSlot {
    signal: Semaphore,
    tasks: Stealer<Task>,
    stop: AtomicBool,
}

struct Shared {
    slots: Box<[WorkerSlot]>,
    /// Tasks enqueued but not yet dequeued by a worker.
    in_flight: CachePadded<AtomicI64>,
}

impl Shared {
    /// Account one dequeued task. The Release/Acquire pair makes every
    /// drained task's writes visible to whoever observes quiescence.
    #[inline]
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
        }
    }
}

// ============================================================================
// ThreadPool
// ============================================================================

/// Fixed-size work-stealing thread pool.
///
/// Submission takes `&mut self`: one submitter at a time, enforced by the
/// borrow checker, which is what keeps the round-robin cursor plain and
/// each deque single-producer. Wrap the pool in a `Mutex` to share it
/// across submitting threads.
///
/// Dropping the pool blocks until every submitted task has completed and
/// every worker has exited.
///
/// # Example
///
/// ```
/// use pilfer::ThreadPool;
///
/// let mut pool = ThreadPool::new(4);
/// let handle = pool.submit(|| 2 + 2);
/// assert_eq!(handle.join().unwrap(), 4);
/// ```
pub struct ThreadPool {
    shared: Arc<Shared>,
    /// Producer handles, index-aligned with `shared.slots`. Only the
    /// submitter (holder of `&mut self`) pushes.
    producers: Vec<deque::Worker<Task>>,
    threads: Vec<thread::JoinHandle<()>>,
    /// Round-robin cursor. Plain because submission is `&mut self`.
    submit_index: usize,
}

impl ThreadPool {
    /// Create a pool with `workers` threads and default tuning.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero, or if a worker thread or its OS
    /// semaphore cannot be created.
    pub fn new(workers: usize) -> Self {
        Self::with_config(PoolConfig {
            workers,
            ..PoolConfig::default()
        })
    }

    /// Create a pool from an explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration fails [`PoolConfig::validate`].
    pub fn with_config(cfg: PoolConfig) -> Self {
        cfg.validate();

        let mut producers = Vec::with_capacity(cfg.workers);
        let mut slots = Vec::with_capacity(cfg.workers);
        for _ in 0..cfg.workers {
            let producer = deque::Worker::new(cfg.deque_capacity);
            slots.push(WorkerSlot {
                signal: Semaphore::with_spin(0, cfg.semaphore_spin),
                tasks: producer.stealer(),
                stop: AtomicBool::new(false),
            });
            producers.push(producer);
        }

        let shared = Arc::new(Shared {
            slots: slots.into_boxed_slice(),
            in_flight: CachePadded::new(AtomicI64::new(0)),
        });

        let mut threads = Vec::with_capacity(cfg.workers);
        for id in 0..cfg.workers {
            let shared = Arc::clone(&shared);
            let mut rng = Xoroshiro128::new(cfg.seed);
            for _ in 0..id {
                rng.jump();
            }
            let spin_budget = cfg.spin_budget;

            let th = thread::Builder::new()
                .name(format!("pilfer-worker-{id}"))
                .spawn(move || worker_loop(id, &shared, &mut rng, spin_budget))
                .expect("failed to spawn worker thread");
            threads.push(th);
        }

        Self {
            shared,
            producers,
            threads,
            submit_index: 0,
        }
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.shared.slots.len()
    }

    /// Submit a task and get a handle to its result.
    ///
    /// The task runs exactly once on some worker. A panic inside the task
    /// is caught and delivered through the handle; the worker survives.
    pub fn submit<F, R>(&mut self, f: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (promise, handle) = oneshot::promise();
        self.execute(Box::new(move || {
            promise.complete(panic::catch_unwind(AssertUnwindSafe(f)));
        }));
        handle
    }

    /// Submit fire-and-forget work: no handle, and a panic inside the task
    /// is swallowed.
    pub fn submit_detach<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute(Box::new(move || {
            // No handle, so the panic has nowhere to go.
            let _ = panic::catch_unwind(AssertUnwindSafe(f));
        }));
    }

    fn execute(&mut self, task: Task) {
        let i = self.submit_index % self.producers.len();
        self.submit_index = self.submit_index.wrapping_add(1);

        self.shared.in_flight.fetch_add(1, Ordering::Relaxed);
        self.producers[i].push(task);
        self.shared.slots[i].signal.release(1);
    }
}

impl Default for ThreadPool {
    /// A pool with one worker per available hardware thread.
    fn default() -> Self {
        Self::with_config(PoolConfig::default())
    }
}

impl Drop for ThreadPool {
    /// Runs every already-submitted task, then stops and joins all
    /// workers.
    fn drop(&mut self) {
        for slot in self.shared.slots.iter() {
            slot.stop.store(true, Ordering::Release);
        }
        // One token per worker guarantees every sleeper wakes to see the
        // flag; awake workers fall through on their next outer iteration.
        for slot in self.shared.slots.iter() {
            slot.signal.release(1);
        }
        for th in self.threads.drain(..) {
            // Task panics are caught in the wrapper, so a worker panic is
            // an internal bug; surface it unless we are already unwinding.
            if th.join().is_err() && !thread::panicking() {
                panic!("worker thread panicked");
            }
        }
    }
}

// ============================================================================
// Worker loop
// ============================================================================

/// Per-worker scheduling loop.
///
/// Outer: sleep on the slot semaphore until a batch of work (or shutdown)
/// is signalled. Inner: while the global in-flight count is positive, pick
/// a deque and try to take from it: own deque while under the spin budget
/// or while it looks non-empty, a uniformly random victim otherwise. Local
/// work is the cheap case; randomized victims keep thieves from piling
/// onto one deque.
fn worker_loop(id: usize, shared: &Shared, rng: &mut Xoroshiro128, spin_budget: u32) {
    let workers = shared.slots.len();
    let me = &shared.slots[id];

    loop {
        me.signal.acquire_many();

        let mut spins = 0u32;
        while shared.in_flight.load(Ordering::Acquire) > 0 {
            let victim = if spins < spin_budget || !me.tasks.is_empty() {
                id
            } else {
                rng.next_usize(workers)
            };
            spins = spins.saturating_add(1);

            if let Some(task) = shared.slots[victim].tasks.steal() {
                shared.finish_one();
                task();
            }
        }

        if me.stop.load(Ordering::Acquire) {
            break;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
