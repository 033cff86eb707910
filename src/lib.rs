//! Lock-free work-stealing thread pool.
//!
//! A fixed set of worker threads executes arbitrary nullary closures in
//! parallel. Submitters get a [`JoinHandle`] to each task's eventual
//! result, or fire-and-forget with [`ThreadPool::submit_detach`].
//!
//! The interesting machinery is three small lock-free pieces:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`deque`] | Chase-Lev SPMC deque with a growable ring and deferred ring reclamation |
//! | [`semaphore`] | Counting semaphore with a user-space spin fast path for worker wakeup |
//! | [`pool`] | Round-robin submission, randomized stealing, quiescence via a global in-flight count |
//!
//! Supporting cast: [`rng`] (per-worker xoroshiro128** victim selection)
//! and a private oneshot channel that carries each result (value or caught
//! panic) back to the submitter.
//!
//! # Example
//!
//! ```
//! use pilfer::ThreadPool;
//!
//! let mut pool = ThreadPool::new(4);
//!
//! let handles: Vec<_> = (0..16u64).map(|i| pool.submit(move || i * i)).collect();
//! let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
//!
//! assert_eq!(total, (0..16u64).map(|i| i * i).sum());
//! ```
//!
//! # Guarantees and non-guarantees
//!
//! - Every submitted task runs exactly once; dropping the pool blocks
//!   until all of them have.
//! - A panicking task reports through its handle and never takes a worker
//!   down.
//! - No ordering is promised across workers: thieves take items out of
//!   submission order. A single-worker pool degenerates to a FIFO queue.
//! - Memory is unbounded: deque rings grow on demand and are only
//!   reclaimed when the pool drops.

pub mod deque;
mod oneshot;
pub mod pool;
pub mod rng;
pub mod semaphore;

pub use oneshot::JoinHandle;
pub use pool::{PoolConfig, ThreadPool};
