//! Single-write, single-read result channel between a task and its
//! submitter.
//!
//! A [`Promise`] travels into the pool inside the task wrapper and is
//! completed exactly once with the task's outcome; the matching
//! [`JoinHandle`] blocks until that happens. The payload is a
//! [`std::thread::Result`], so a panicking task surfaces its panic payload
//! the same way `std::thread::JoinHandle::join` does.
//!
//! Mutex + condvar is plenty here: completion is a single store and the
//! submitter blocks at most once, well off the stealing hot path.

use std::any::Any;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

enum Slot<T> {
    /// No outcome yet.
    Pending,
    /// Task finished; outcome not yet claimed by `join`.
    Ready(thread::Result<T>),
    /// The promise was dropped without completing (the task never ran).
    Orphaned,
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// Create a connected promise/handle pair.
pub(crate) fn promise<T>() -> (Promise<T>, JoinHandle<T>) {
    let inner = Arc::new(Inner {
        slot: Mutex::new(Slot::Pending),
        ready: Condvar::new(),
    });
    (
        Promise {
            inner: Arc::clone(&inner),
            completed: false,
        },
        JoinHandle { inner },
    )
}

/// Write side. Completed exactly once by the task wrapper.
pub(crate) struct Promise<T> {
    inner: Arc<Inner<T>>,
    completed: bool,
}

impl<T> Promise<T> {
    /// Publish the task outcome and wake the joiner.
    pub(crate) fn complete(mut self, result: thread::Result<T>) {
        let mut slot = self.inner.slot.lock().expect("oneshot mutex poisoned");
        *slot = Slot::Ready(result);
        self.completed = true;
        drop(slot);
        self.inner.ready.notify_one();
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        // Wake the joiner with a synthetic failure rather than leaving it
        // blocked forever.
        let mut slot = self.inner.slot.lock().expect("oneshot mutex poisoned");
        if matches!(*slot, Slot::Pending) {
            *slot = Slot::Orphaned;
            drop(slot);
            self.inner.ready.notify_one();
        }
    }
}

/// Handle to a submitted task's eventual result.
///
/// Mirrors [`std::thread::JoinHandle`]: [`join`](Self::join) returns
/// `Ok(value)` for a task that ran to completion and `Err(payload)` with
/// the caught panic payload for one that panicked.
pub struct JoinHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> JoinHandle<T> {
    /// Block until the task finishes and return its outcome.
    pub fn join(self) -> thread::Result<T> {
        let mut slot = self.inner.slot.lock().expect("oneshot mutex poisoned");
        while matches!(*slot, Slot::Pending) {
            slot = self.inner.ready.wait(slot).expect("oneshot mutex poisoned");
        }
        match mem::replace(&mut *slot, Slot::Pending) {
            Slot::Ready(result) => result,
            Slot::Orphaned => Err(orphan_payload()),
            Slot::Pending => unreachable!("woke with pending oneshot"),
        }
    }

    /// Whether the task has finished. Non-blocking.
    pub fn is_finished(&self) -> bool {
        !matches!(
            *self.inner.slot.lock().expect("oneshot mutex poisoned"),
            Slot::Pending
        )
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn orphan_payload() -> Box<dyn Any + Send + 'static> {
    Box::new("task was dropped before it could run")
}
