//! End-to-end thread pool scenarios.
//!
//! These mirror how the pool is actually used: submit a burst, drop the
//! pool (which drains everything), then check every handle. The worker
//! counts cover the degenerate single-worker pool plus pools both narrower
//! and wider than typical core counts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pilfer::{PoolConfig, ThreadPool};

const WORKER_COUNTS: [usize; 5] = [1, 2, 3, 4, 12];

#[test]
fn construct_destruct_many_pools() {
    // A pool that never sees work must start and wind down cleanly,
    // thousands of times, without leaking threads.
    for _ in 0..10_000 {
        let _pool = ThreadPool::default();
    }
}

fn null_jobs(workers: usize) {
    let mut handles = Vec::with_capacity(1 << 21);

    {
        let mut pool = ThreadPool::new(workers);
        for _ in 0..(1u32 << 21) {
            handles.push(pool.submit(|| {}));
        }
    }

    for handle in handles {
        assert!(handle.is_finished());
        handle.join().unwrap();
    }
}

#[test]
fn null_jobs_all_worker_counts() {
    for workers in WORKER_COUNTS {
        null_jobs(workers);
    }
}

fn detach_jobs(workers: usize) {
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let mut pool = ThreadPool::new(workers);
        for _ in 0..(1u32 << 21) {
            let counter = Arc::clone(&counter);
            pool.submit_detach(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
    }

    assert_eq!(counter.load(Ordering::Relaxed), 1 << 21);
}

#[test]
fn detach_jobs_all_worker_counts() {
    for workers in WORKER_COUNTS {
        detach_jobs(workers);
    }
}

fn indexed_jobs(workers: usize) {
    let mut handles = Vec::with_capacity(1 << 21);

    {
        let mut pool = ThreadPool::new(workers);
        for i in 0..(1usize << 21) {
            handles.push(pool.submit(move || i));
        }
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), i);
    }
}

#[test]
fn indexed_jobs_all_worker_counts() {
    for workers in WORKER_COUNTS {
        indexed_jobs(workers);
    }
}

#[test]
fn sleeping_jobs_run_in_parallel() {
    const WORKERS: usize = 4;
    const JOBS: usize = 100;
    const NAP: Duration = Duration::from_millis(100);

    let start = Instant::now();
    let mut handles = Vec::with_capacity(JOBS);

    {
        let mut pool = ThreadPool::new(WORKERS);
        for i in 0..JOBS {
            handles.push(pool.submit(move || {
                thread::sleep(NAP);
                i
            }));
        }
    }
    let elapsed = start.elapsed();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), i);
    }

    // Serial execution would take JOBS * NAP = 10s. Four workers should
    // land near 2.5s; anything under this bound proves real overlap.
    assert!(
        elapsed < Duration::from_secs(6),
        "100 sleeping tasks on 4 workers took {:?}",
        elapsed
    );
}

#[test]
fn heterogeneous_sleeps_all_resolve() {
    const WORKERS: usize = 4;

    let start = Instant::now();
    let mut handles = Vec::new();

    {
        let mut pool = ThreadPool::new(WORKERS);
        for i in 0..(10 * WORKERS) {
            handles.push(pool.submit(move || {
                thread::sleep(Duration::from_millis(i as u64 * 10));
            }));
        }
    }
    let elapsed = start.elapsed();

    for handle in handles {
        handle.join().unwrap();
    }

    // Sum of sleeps is 7.8s; the longest single task is 390ms. A fair
    // spread over 4 workers finishes in roughly sum/4 + max.
    assert!(
        elapsed < Duration::from_secs(6),
        "heterogeneous sleeps took {:?}",
        elapsed
    );
}

#[test]
fn cpu_bound_jobs_balance_across_workers() {
    const WORKERS: usize = 12;
    const JOBS: usize = 100;
    // Trial division over the whole range keeps every task busy for
    // millions of iterations; small enough to stay quick in debug builds.
    const BIG_PRIME: u64 = 10_000_019;

    let mut handles = Vec::with_capacity(JOBS);

    {
        let mut pool = ThreadPool::new(WORKERS);
        for _ in 0..JOBS {
            handles.push(pool.submit(|| {
                for d in 2..BIG_PRIME {
                    if BIG_PRIME % d == 0 {
                        return false;
                    }
                }
                true
            }));
        }
    }

    for handle in handles {
        assert!(handle.join().unwrap(), "{} reported composite", BIG_PRIME);
    }
}

#[test]
fn config_knobs_are_respected() {
    // Extreme tuning values must not affect correctness, only speed.
    let cfg = PoolConfig {
        workers: 3,
        seed: 7,
        spin_budget: 0,
        semaphore_spin: 0,
        deque_capacity: 2,
    };

    let counter = Arc::new(AtomicUsize::new(0));
    {
        let mut pool = ThreadPool::with_config(cfg);
        for _ in 0..50_000 {
            let counter = Arc::clone(&counter);
            pool.submit_detach(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
    }
    assert_eq!(counter.load(Ordering::Relaxed), 50_000);
}

#[test]
fn submitting_from_a_second_thread_via_move() {
    // The pool is Send: hand it to another thread wholesale.
    let mut pool = ThreadPool::new(2);
    let warmup = pool.submit(|| 1);
    assert_eq!(warmup.join().unwrap(), 1);

    let th = thread::spawn(move || {
        let handle = pool.submit(|| 2);
        handle.join().unwrap()
    });
    assert_eq!(th.join().unwrap(), 2);
}
