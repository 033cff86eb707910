//! Lightweight counting semaphore for worker wakeup.
//!
//! # Design
//!
//! A user-space atomic counter in front of an OS blocking semaphore, after
//! Preshing's "lightweight semaphore" construction. The counter is the
//! source of truth; the OS primitive exists only to park threads.
//!
//! - `m_count > 0`: that many pre-paid tokens are claimable with a single
//!   CAS, no kernel entry.
//! - `m_count < 0`: `-m_count` threads are blocked (or about to block) on
//!   the OS semaphore.
//!
//! # Why `acquire_many` instead of `acquire`
//!
//! The pool signals a worker once per submitted task, but a woken worker
//! drains its whole deque before sleeping again. Consuming one token per
//! task would force one kernel wake per task; `acquire_many` claims every
//! pending token in one shot, collapsing a burst of releases into a single
//! wake.
//!
//! # Ordering
//!
//! `release` publishes with a Release `fetch_add`; `acquire_many` claims
//! with an Acquire CAS (or an AcqRel CAS on the contended fallback), so
//! everything written before a release is visible after the matching
//! acquire.

use std::sync::atomic::{compiler_fence, AtomicI64, Ordering};

use crossbeam_utils::CachePadded;

/// Spin iterations `acquire_many` attempts before falling back to the
/// kernel. Tunable per-instance via [`Semaphore::with_spin`].
pub const DEFAULT_SPIN: u32 = 10_000;

/// Counting semaphore with a user-space fast path.
pub struct Semaphore {
    count: CachePadded<AtomicI64>,
    os: sys::OsSemaphore,
    spin: u32,
}

impl Semaphore {
    /// Create a semaphore holding `initial` tokens.
    ///
    /// # Panics
    ///
    /// Panics if `initial` is negative, or if the OS semaphore cannot be
    /// created.
    pub fn new(initial: i64) -> Self {
        Self::with_spin(initial, DEFAULT_SPIN)
    }

    /// Like [`new`](Self::new), with an explicit spin budget for the
    /// user-space phase of [`acquire_many`](Self::acquire_many). A budget
    /// of zero goes straight to the kernel path.
    pub fn with_spin(initial: i64, spin: u32) -> Self {
        assert!(initial >= 0, "initial semaphore count must be >= 0");
        Self {
            count: CachePadded::new(AtomicI64::new(initial)),
            os: sys::OsSemaphore::new(0),
            spin,
        }
    }

    /// Make `n` tokens available, waking blocked acquirers as needed.
    ///
    /// A negative prior count is the number of threads currently parked in
    /// the kernel; we post exactly `min(n, waiters)` so surplus tokens stay
    /// in the counter, claimable without a syscall.
    pub fn release(&self, n: i64) {
        debug_assert!(n >= 1, "release of {} tokens", n);
        let prev = self.count.fetch_add(n, Ordering::Release);
        if prev < 0 {
            self.os.post(n.min(-prev));
        }
    }

    /// Claim every available token, blocking if there are none.
    ///
    /// Returns once at least one token has been consumed. All tokens
    /// present at the claim are consumed together.
    pub fn acquire_many(&self) {
        // Fast path: spin for a positive count and swap it to zero.
        for _ in 0..self.spin {
            let cur = self.count.load(Ordering::Relaxed);
            if cur > 0
                && self
                    .count
                    .compare_exchange(cur, 0, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            // Keep the compiler from collapsing the loop into a single load.
            compiler_fence(Ordering::Acquire);
        }

        // Slow path: either register as a waiter (count <= 0) and park, or
        // claim whatever a racing release just made available.
        let mut cur = self.count.load(Ordering::Relaxed);
        loop {
            if cur <= 0 {
                match self.count.compare_exchange(
                    cur,
                    cur - 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        self.os.wait();
                        return;
                    }
                    Err(observed) => cur = observed,
                }
            } else {
                match self
                    .count
                    .compare_exchange(cur, 0, Ordering::AcqRel, Ordering::Relaxed)
                {
                    Ok(_) => return,
                    Err(observed) => cur = observed,
                }
            }
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("spin", &self.spin)
            .finish()
    }
}

// ============================================================================
// OS blocking primitive
// ============================================================================

#[cfg(unix)]
mod sys {
    //! POSIX `sem_t`. Unnamed, process-private.

    use std::cell::UnsafeCell;
    use std::io;

    pub(super) struct OsSemaphore {
        sem: UnsafeCell<libc::sem_t>,
    }

    // SAFETY: sem_wait/sem_post are thread-safe by POSIX; the UnsafeCell
    // only exists because libc takes *mut sem_t.
    unsafe impl Send for OsSemaphore {}
    unsafe impl Sync for OsSemaphore {}

    impl OsSemaphore {
        pub(super) fn new(initial: u32) -> Self {
            // SAFETY: zeroed storage is valid input for sem_init, which
            // initializes it in place before any wait/post can run.
            let sem = UnsafeCell::new(unsafe { std::mem::zeroed() });
            let rc = unsafe { libc::sem_init(sem.get(), 0, initial as libc::c_uint) };
            assert_eq!(
                rc,
                0,
                "sem_init failed: {}",
                io::Error::last_os_error()
            );
            Self { sem }
        }

        pub(super) fn wait(&self) {
            loop {
                // SAFETY: self.sem was initialized in new() and lives as
                // long as self.
                let rc = unsafe { libc::sem_wait(self.sem.get()) };
                if rc == 0 {
                    return;
                }
                let err = io::Error::last_os_error();
                // sem_wait is interruptible by signal delivery.
                if err.raw_os_error() != Some(libc::EINTR) {
                    panic!("sem_wait failed: {err}");
                }
            }
        }

        pub(super) fn post(&self, n: i64) {
            for _ in 0..n {
                // SAFETY: as in wait().
                let rc = unsafe { libc::sem_post(self.sem.get()) };
                assert_eq!(
                    rc,
                    0,
                    "sem_post failed: {}",
                    io::Error::last_os_error()
                );
            }
        }
    }

    impl Drop for OsSemaphore {
        fn drop(&mut self) {
            // SAFETY: no thread can be blocked here once we hold &mut self.
            unsafe {
                libc::sem_destroy(self.sem.get());
            }
        }
    }
}

#[cfg(not(unix))]
mod sys {
    //! Mutex + condvar permit counter for platforms without a POSIX
    //! semaphore. Only hit when the user-space spin fails, so the lock is
    //! off the hot path.

    use std::sync::{Condvar, Mutex};

    pub(super) struct OsSemaphore {
        permits: Mutex<u64>,
        available: Condvar,
    }

    impl OsSemaphore {
        pub(super) fn new(initial: u32) -> Self {
            Self {
                permits: Mutex::new(u64::from(initial)),
                available: Condvar::new(),
            }
        }

        pub(super) fn wait(&self) {
            let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
            while *permits == 0 {
                permits = self
                    .available
                    .wait(permits)
                    .expect("semaphore mutex poisoned");
            }
            *permits -= 1;
        }

        pub(super) fn post(&self, n: i64) {
            let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
            *permits += n as u64;
            drop(permits);
            if n == 1 {
                self.available.notify_one();
            } else {
                self.available.notify_all();
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
