//! Lock-free SPMC work-stealing deque with a growable ring buffer.
//!
//! # Design
//!
//! This is the Chase-Lev deque with the memory orderings of Lê, Pop, Cohen
//! and Nardelli, "Correct and Efficient Work-Stealing for Weak Memory
//! Models" (PPoPP '13). One owner pushes and pops at the *bottom*; any
//! number of thieves steal at the *top*. The single CAS on `top` is the
//! only read-modify-write in the steal path and linearizes every
//! last-element race.
//!
//! ```text
//!              top ──►┌─────┐◄── steal() (any thread, CAS on top)
//!                     │  a  │
//!                     │  b  │      live items: [top, bottom)
//!                     │  c  │
//!           bottom ──►└─────┘◄── push() / pop() (owner only)
//! ```
//!
//! # Key properties
//!
//! - **Indices are monotone `i64`s.** They only ever increase; the slot is
//!   `index & (capacity - 1)`. 64 bits cannot wrap in practice, which is
//!   what makes the CAS on `top` ABA-safe.
//! - **Items live behind pointers.** `push` boxes the item and the ring
//!   stores `AtomicPtr<T>`, so a slot transfer is one relaxed atomic op and
//!   a lost CAS never touches the allocation it observed. Whichever CAS
//!   wins an index owns that index's box, exactly once.
//! - **The ring grows, never shrinks.** When full, the owner copies the
//!   live window into a ring of twice the capacity and publishes it.
//! - **Deferred reclamation.** A thief may hold a pointer to a superseded
//!   ring, so old rings are parked on an owner-only garbage list and freed
//!   when the deque itself drops. Reclaiming earlier would need hazard
//!   pointers or epochs, which this deque deliberately avoids.
//!
//! # Ordering rationale
//!
//! The fences are load-bearing; do not weaken them.
//!
//! - `push`: release fence between the slot store and the `bottom` store,
//!   so a thief that observes the new `bottom` observes the slot.
//! - `pop`: the owner publishes the decremented `bottom` and *then* reads
//!   `top` across a seq-cst fence; `steal` reads `top` and then `bottom`
//!   across a seq-cst fence. The two fences order the owner's
//!   bottom-decrement against the thief's top-read globally, which is what
//!   stops a pop and a steal from both taking the last item without ever
//!   seeing each other.
//! - The last-item CAS in both `pop` and `steal` is seq-cst: exactly one
//!   of the racing parties advances `top` and consumes the slot.
//!
//! # Ownership of slot contents
//!
//! A slot's box belongs to whichever call most recently observed its index
//! *and* won the right to consume it (uncontested pop, or a successful CAS
//! of `top`). Losers return `None` and must not dereference the pointer
//! they loaded.

#[cfg(not(loom))]
use std::sync::atomic::{fence, AtomicI64, AtomicPtr, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{fence, AtomicI64, AtomicPtr, Ordering};

use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Ring capacity used by [`Worker::default`].
pub const DEFAULT_CAPACITY: usize = 1024;

// ============================================================================
// Ring storage
// ============================================================================

/// Fixed-capacity ring of item pointers, indexed by the low bits of a
/// monotone index.
struct RingBuffer<T> {
    cap: i64,
    mask: i64,
    slots: Box<[AtomicPtr<T>]>,
}

impl<T> RingBuffer<T> {
    fn new(cap: i64) -> Self {
        let slots = (0..cap).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Self {
            cap,
            mask: cap - 1,
            slots,
        }
    }

    /// Relaxed store at the masked index. Visibility comes from the
    /// top/bottom fences, not the slot itself.
    #[inline]
    fn store(&self, index: i64, item: *mut T) {
        self.slots[(index & self.mask) as usize].store(item, Ordering::Relaxed);
    }

    /// Relaxed load at the masked index.
    #[inline]
    fn load(&self, index: i64) -> *mut T {
        self.slots[(index & self.mask) as usize].load(Ordering::Relaxed)
    }

    /// Allocate a ring of twice the capacity holding the live window
    /// `[top, bottom)` at the same indices.
    fn grow(&self, bottom: i64, top: i64) -> RingBuffer<T> {
        let bigger = RingBuffer::new(2 * self.cap);
        for i in top..bottom {
            bigger.store(i, self.load(i));
        }
        bigger
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct Inner<T> {
    /// Next index a thief will claim. CAS-advanced by thieves and by the
    /// owner on the last-item race.
    top: CachePadded<AtomicI64>,
    /// Next index the owner will write. Written only by the owner.
    bottom: CachePadded<AtomicI64>,
    /// Current ring. Swapped (by the owner) only on growth.
    ring: AtomicPtr<RingBuffer<T>>,
    /// Superseded rings, kept alive for thieves still reading through a
    /// stale ring pointer. Owner-only append; freed on drop.
    garbage: UnsafeCell<Vec<*mut RingBuffer<T>>>,
}

// SAFETY: `garbage` is only touched through `Worker`, which is `!Sync`, so
// a single thread appends; `ring` and the indices are atomics; item
// pointers are handed across threads only via the CAS protocol above.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
    #[inline]
    fn live(&self) -> i64 {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        b - t
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // &mut self: no other thread holds a handle any more.
        let t = self.top.load(Ordering::Relaxed);
        let b = self.bottom.load(Ordering::Relaxed);
        let ring = self.ring.load(Ordering::Relaxed);

        // Items still enqueued are dropped through the live ring.
        for i in t..b {
            // SAFETY: [top, bottom) slots hold live boxes owned by the
            // deque, and nobody else can consume them now.
            unsafe {
                drop(Box::from_raw((*ring).load(i)));
            }
        }

        // SAFETY: the live ring and every retired ring were allocated via
        // Box::into_raw by this deque and never freed elsewhere.
        unsafe {
            drop(Box::from_raw(ring));
            for &old in (*self.garbage.get()).iter() {
                drop(Box::from_raw(old));
            }
        }
    }
}

// ============================================================================
// Owner handle
// ============================================================================

/// Owner side of the deque: `push` and `pop` at the bottom.
///
/// `Send` but `!Sync` and not `Clone`: the single-producer contract is a
/// compile-time fact, not a comment. Hand [`Stealer`]s to everyone else.
///
/// # Example
///
/// ```
/// use pilfer::deque::Worker;
///
/// let worker = Worker::new(8);
/// worker.push(1);
/// worker.push(2);
///
/// // Owner end is LIFO, thief end is FIFO.
/// assert_eq!(worker.pop(), Some(2));
/// assert_eq!(worker.stealer().steal(), Some(1));
/// ```
pub struct Worker<T> {
    inner: Arc<Inner<T>>,
    /// Opts out of `Sync` (a `Cell` is `Send + !Sync`).
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Send> Worker<T> {
    /// Create an empty deque whose initial ring holds `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics unless `capacity` is a nonzero power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "deque capacity must be a nonzero power of two, got {}",
            capacity
        );
        let ring = Box::into_raw(Box::new(RingBuffer::new(capacity as i64)));
        Self {
            inner: Arc::new(Inner {
                top: CachePadded::new(AtomicI64::new(0)),
                bottom: CachePadded::new(AtomicI64::new(0)),
                ring: AtomicPtr::new(ring),
                garbage: UnsafeCell::new(Vec::with_capacity(32)),
            }),
            _not_sync: PhantomData,
        }
    }

    /// A new thief handle for this deque.
    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Push an item at the bottom, growing the ring if it is full.
    pub fn push(&self, item: T) {
        let item = Box::into_raw(Box::new(item));
        let inner = &*self.inner;

        let b = inner.bottom.load(Ordering::Relaxed);
        let t = inner.top.load(Ordering::Acquire);
        let mut ring = inner.ring.load(Ordering::Relaxed);

        // SAFETY: `ring` (and any ring it is swapped for) stays allocated
        // until the deque drops; only the owner writes slot `b` because
        // `b` is outside the stealable window [t, b).
        unsafe {
            if b - t >= (*ring).cap - 1 {
                // Full: publish a doubled ring and retire this one. A
                // thief holding the old pointer still reads valid memory.
                let bigger = Box::into_raw(Box::new((*ring).grow(b, t)));
                (*inner.garbage.get()).push(ring);
                inner.ring.store(bigger, Ordering::Relaxed);
                ring = bigger;
            }
            (*ring).store(b, item);
        }

        // Slot write must be visible before the new bottom.
        fence(Ordering::Release);
        inner.bottom.store(b + 1, Ordering::Relaxed);
    }

    /// Pop the most recently pushed item, if any.
    ///
    /// Returns `None` on an empty deque, or when a thief wins the race for
    /// the last item.
    pub fn pop(&self) -> Option<T> {
        let inner = &*self.inner;

        // Decrement-then-check: claim slot b tentatively, then look at top
        // across a global fence to find out whether the claim stands.
        let b = inner.bottom.load(Ordering::Relaxed) - 1;
        let ring = inner.ring.load(Ordering::Relaxed);
        inner.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = inner.top.load(Ordering::Relaxed);

        if t <= b {
            // SAFETY: slot b is inside [t, b] and the pointer was published
            // by a push on this thread.
            let item = unsafe { (*ring).load(b) };

            if t == b {
                // Last item: race any thief via CAS on top. Either way the
                // deque ends up empty with bottom == top == t + 1.
                let won = inner
                    .top
                    .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                    .is_ok();
                inner.bottom.store(b + 1, Ordering::Relaxed);
                if !won {
                    // The winning thief owns the box now.
                    return None;
                }
            }
            // SAFETY: uncontested (t < b) or we won the CAS; either way
            // this call is the unique consumer of index b.
            Some(unsafe { *Box::from_raw(item) })
        } else {
            // Deque was empty; undo the decrement.
            inner.bottom.store(b + 1, Ordering::Relaxed);
            None
        }
    }

    /// Number of items at an instant. Advisory under concurrency.
    pub fn len(&self) -> usize {
        self.inner.live().max(0) as usize
    }

    /// Whether the deque appears empty. Advisory under concurrency.
    pub fn is_empty(&self) -> bool {
        self.inner.live() <= 0
    }
}

impl<T: Send> Default for Worker<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<T> fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker").field("len", &self.inner.live()).finish()
    }
}

// ============================================================================
// Thief handle
// ============================================================================

/// Thief side of the deque: `steal` from the top. `Clone + Send + Sync`.
pub struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send> Stealer<T> {
    /// Try to take the oldest item.
    ///
    /// Returns `None` if the deque is empty *or* another thread won the
    /// CAS; callers that want an item retry or move on to another victim.
    pub fn steal(&self) -> Option<T> {
        let inner = &*self.inner;

        let t = inner.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = inner.bottom.load(Ordering::Acquire);

        if t < b {
            // The paper loads the ring with consume ordering; Rust spells
            // that Acquire. Reload under the fence so a ring published
            // before `bottom` is the one we index.
            let ring = inner.ring.load(Ordering::Acquire);
            // SAFETY: t is inside [t, b) and any ring this pointer refers
            // to stays allocated until the deque drops.
            let item = unsafe { (*ring).load(t) };

            if inner
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                // Lost the race; the winner consumes index t.
                return None;
            }
            // SAFETY: the CAS makes this call the unique consumer of t.
            Some(unsafe { *Box::from_raw(item) })
        } else {
            None
        }
    }

    /// Number of items at an instant. Advisory under concurrency.
    pub fn len(&self) -> usize {
        self.inner.live().max(0) as usize
    }

    /// Whether the deque appears empty. Advisory under concurrency.
    pub fn is_empty(&self) -> bool {
        self.inner.live() <= 0
    }
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Stealer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stealer").field("len", &self.inner.live()).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
    use std::thread;

    #[test]
    fn pop_on_empty_returns_none() {
        let worker: Worker<u32> = Worker::new(4);
        assert_eq!(worker.pop(), None);
        // The failed pop must not corrupt the indices.
        worker.push(7);
        assert_eq!(worker.pop(), Some(7));
        assert_eq!(worker.pop(), None);
    }

    #[test]
    fn steal_on_empty_returns_none() {
        let worker: Worker<u32> = Worker::new(4);
        assert_eq!(worker.stealer().steal(), None);
    }

    #[test]
    fn owner_end_is_lifo() {
        let worker = Worker::new(8);
        for i in 0..4 {
            worker.push(i);
        }
        for i in (0..4).rev() {
            assert_eq!(worker.pop(), Some(i));
        }
        assert_eq!(worker.pop(), None);
    }

    #[test]
    fn thief_end_is_fifo() {
        let worker = Worker::new(8);
        let stealer = worker.stealer();
        for i in 0..4 {
            worker.push(i);
        }
        for i in 0..4 {
            assert_eq!(stealer.steal(), Some(i));
        }
        assert_eq!(stealer.steal(), None);
    }

    #[test]
    fn len_tracks_push_and_pop() {
        let worker = Worker::new(8);
        assert!(worker.is_empty());
        worker.push(1);
        worker.push(2);
        assert_eq!(worker.len(), 2);
        assert_eq!(worker.stealer().len(), 2);
        let _ = worker.pop();
        assert_eq!(worker.len(), 1);
    }

    #[test]
    fn growth_preserves_every_item() {
        // Capacity 2 forces several doublings.
        let worker = Worker::new(2);
        for i in 0..100 {
            worker.push(i);
        }
        assert_eq!(worker.len(), 100);

        let mut popped = Vec::new();
        while let Some(v) = worker.pop() {
            popped.push(v);
        }
        popped.reverse();
        assert_eq!(popped, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn growth_preserves_steal_order() {
        let worker = Worker::new(2);
        let stealer = worker.stealer();
        for i in 0..50 {
            worker.push(i);
        }
        for i in 0..50 {
            assert_eq!(stealer.steal(), Some(i));
        }
        assert_eq!(stealer.steal(), None);
    }

    #[test]
    fn interleaved_push_pop_steal() {
        let worker = Worker::new(4);
        let stealer = worker.stealer();

        worker.push(1);
        worker.push(2);
        worker.push(3);
        assert_eq!(stealer.steal(), Some(1));
        assert_eq!(worker.pop(), Some(3));
        worker.push(4);
        assert_eq!(stealer.steal(), Some(2));
        assert_eq!(stealer.steal(), Some(4));
        assert_eq!(worker.pop(), None);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_capacity_rejected() {
        let _: Worker<u32> = Worker::new(3);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn zero_capacity_rejected() {
        let _: Worker<u32> = Worker::new(0);
    }

    #[test]
    fn drop_releases_remaining_items() {
        use std::sync::Arc;

        let drops = Arc::new(AtomicUsize::new(0));

        struct DropTracker(Arc<AtomicUsize>);
        impl Drop for DropTracker {
            fn drop(&mut self) {
                self.0.fetch_add(1, StdOrdering::Relaxed);
            }
        }

        {
            // Capacity 2 so the garbage list is exercised too.
            let worker = Worker::new(2);
            for _ in 0..10 {
                worker.push(DropTracker(Arc::clone(&drops)));
            }
            let _ = worker.pop();
        }
        assert_eq!(drops.load(StdOrdering::Relaxed), 10);
    }

    #[test]
    fn concurrent_thieves_take_each_item_once() {
        const ITEMS: usize = 10_000;
        const THIEVES: usize = 4;

        let worker = Worker::new(64);
        for i in 0..ITEMS {
            worker.push(i);
        }

        let mut handles = Vec::new();
        for _ in 0..THIEVES {
            let stealer = worker.stealer();
            handles.push(thread::spawn(move || {
                let mut taken = Vec::new();
                loop {
                    match stealer.steal() {
                        Some(v) => taken.push(v),
                        None if stealer.is_empty() => break,
                        None => thread::yield_now(),
                    }
                }
                taken
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for th in handles {
            for v in th.join().unwrap() {
                assert!(seen.insert(v), "item {} stolen twice", v);
                total += 1;
            }
        }
        assert_eq!(total, ITEMS);
    }

    #[test]
    fn owner_and_thieves_partition_items() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        const ITEMS: usize = 50_000;

        let worker = Worker::new(2);
        let stealer = worker.stealer();
        let done = Arc::new(AtomicBool::new(false));

        let thief = {
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut taken = Vec::new();
                loop {
                    match stealer.steal() {
                        Some(v) => taken.push(v),
                        None => {
                            if done.load(StdOrdering::Acquire) && stealer.is_empty() {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                }
                taken
            })
        };

        let mut popped = Vec::new();
        for i in 0..ITEMS {
            worker.push(i);
            if i % 3 == 0 {
                if let Some(v) = worker.pop() {
                    popped.push(v);
                }
            }
        }
        while let Some(v) = worker.pop() {
            popped.push(v);
        }
        done.store(true, StdOrdering::Release);

        let stolen = thief.join().unwrap();

        let mut seen = HashSet::new();
        for &v in stolen.iter().chain(popped.iter()) {
            assert!(seen.insert(v), "item {} consumed twice", v);
        }
        assert_eq!(seen.len(), ITEMS);
    }

    /// The singleton race: exactly one of a racing pop/steal pair wins.
    #[test]
    fn last_item_race_has_one_winner() {
        for _ in 0..1000 {
            let worker = Worker::new(4);
            let stealer = worker.stealer();
            worker.push(1u32);

            let thief = thread::spawn(move || stealer.steal());
            let popped = worker.pop();
            let stolen = thief.join().unwrap();

            match (popped, stolen) {
                (Some(1), None) | (None, Some(1)) => {}
                other => panic!("singleton race produced {:?}", other),
            }
            assert!(worker.is_empty());
        }
    }
}

// ============================================================================
// Property tests
// ============================================================================


// ============================================================================
// Loom tests
// ============================================================================
