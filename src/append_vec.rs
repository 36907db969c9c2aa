//! Grow-only concurrent sequence of fixed-layout elements.
//!
//! # Design
//!
//! An [`AppendVec`] stores its elements in a singly-linked chain of nodes,
//! each node a fixed-capacity slice allocated from an [`ArenaPool`]. The
//! chain only ever grows: appends reserve a slot in the tail node with an
//! atomic increment, and a full tail is replaced by compare-exchanging a
//! larger successor into place. Nothing is ever removed; the whole
//! structure is reclaimed when the arena rewinds.
//!
//! Random access walks the chain and is O(nodes); use the iterator for
//! traversal, which is O(1) per element.
//!
//! # Invariants
//!
//! - The chain is reachable from `head`; `tail` is always a node on it.
//! - A node's `next` is written at most once, after its successor is fully
//!   initialised, and never changes again.
//! - Nodes before `tail` are full. `used` may transiently exceed
//!   `capacity` on the tail while a grow is in flight; readers clamp to
//!   `capacity`, which restores the logical bound.
//! - The first `n` appended elements are the concatenation, in chain
//!   order, of the used-prefixes of the nodes.
//!
//! # Ordering
//!
//! Slot reservation is a `Relaxed` fetch-add: the winner is the only
//! writer of that slot. Tail replacement is an `AcqRel` compare-exchange
//! and `next` is published with a `Release` store after it, paired with
//! `Acquire` loads on every reader-side pointer and `used` read, so a
//! reader that sees a non-null `next` also sees the clamped `used` of
//! the node before it.
//!
//! An iterator observes every append that happened-before its creation
//! (joining the appending threads is enough). Appends racing with the
//! iteration may be observed partially or not at all; they are never
//! observed out of reservation order.
//!
//! # Element types
//!
//! Elements must be `Copy`. Arena rewind frees node memory without running
//! destructors, and `Copy` rules out `Drop` at the type level, so leaking
//! a destructor is impossible rather than merely documented.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::pool::ArenaPool;

/// Capacity multiplier applied when a new tail node is allocated.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;

/// One link in the chain: a fixed-capacity element slice plus bookkeeping.
struct Node<T> {
    /// Start of this node's element storage in the arena.
    data: *mut T,
    /// Element capacity. Immutable.
    capacity: usize,
    /// Elements reserved so far. Clamped back to `capacity` (best effort)
    /// when an overshooting reservation triggers a grow.
    used: AtomicUsize,
    /// Successor node. Null until this node is full; written once.
    next: AtomicPtr<Node<T>>,
}

impl<T: Copy> Node<T> {
    /// Allocates a node and its element storage from `pool`.
    fn new_in(pool: &ArenaPool, capacity: usize) -> NonNull<Node<T>> {
        let data = pool.alloc_array::<T>(capacity).as_ptr();
        let node = pool.alloc_array::<Node<T>>(1);
        // SAFETY: `node` is a fresh, properly aligned arena region sized
        // for one `Node<T>`.
        unsafe {
            ptr::write(
                node.as_ptr(),
                Node {
                    data,
                    capacity,
                    used: AtomicUsize::new(0),
                    next: AtomicPtr::new(ptr::null_mut()),
                },
            );
        }
        node
    }

    /// Used-prefix length visible to readers: `used` clamped to capacity.
    #[inline]
    fn used_prefix(&self) -> usize {
        self.used.load(Ordering::Acquire).min(self.capacity)
    }
}

/// Thread-safe grow-only sequence backed by an [`ArenaPool`].
///
/// Appends from any number of threads interleave in the order their slot
/// reservations land; each thread's own appends keep their program order.
/// The sequence borrows the pool, so it cannot outlive it, and the pool
/// cannot be rewound while the sequence is alive.
///
/// # Examples
///
/// ```
/// use memarena_rs::{AppendVec, ArenaPool};
///
/// let pool = ArenaPool::with_block_size(4096);
/// let seq = AppendVec::new(&pool);
/// for i in 0..100u32 {
///     seq.push(i);
/// }
/// assert_eq!(seq.len(), 100);
/// assert_eq!(seq.iter().copied().sum::<u32>(), 4950);
/// ```
pub struct AppendVec<'pool, T: Copy> {
    pool: &'pool ArenaPool,
    /// First node. Immutable after construction.
    head: NonNull<Node<T>>,
    /// Last node; appends target this one.
    tail: AtomicPtr<Node<T>>,
    growth_factor: f64,
}

// SAFETY: all shared mutation goes through atomics, reserved slots are
// written exclusively by their reserving thread, and node memory lives in
// the arena, which outlives `self`. Moving the sequence moves only
// pointers. `T: Send` is required because values cross threads on push,
// `T: Sync` because iteration hands out `&T`.
unsafe impl<T: Copy + Send> Send for AppendVec<'_, T> {}
unsafe impl<T: Copy + Send + Sync> Sync for AppendVec<'_, T> {}

impl<'pool, T: Copy> AppendVec<'pool, T> {
    /// Creates a sequence with a single-element first node and the
    /// default growth factor.
    pub fn new(pool: &'pool ArenaPool) -> Self {
        Self::with_capacity(pool, 1, DEFAULT_GROWTH_FACTOR)
    }

    /// Creates a sequence whose first node holds `initial_capacity`
    /// elements and whose nodes grow by `growth_factor`.
    ///
    /// # Panics
    ///
    /// Panics if `initial_capacity` is zero or `growth_factor < 1.0`.
    pub fn with_capacity(
        pool: &'pool ArenaPool,
        initial_capacity: usize,
        growth_factor: f64,
    ) -> Self {
        assert!(initial_capacity >= 1, "initial capacity must be non-zero");
        assert!(growth_factor >= 1.0, "growth factor must be at least 1.0");
        let head = Node::new_in(pool, initial_capacity);
        Self {
            pool,
            head,
            tail: AtomicPtr::new(head.as_ptr()),
            growth_factor,
        }
    }

    /// Appends `value`.
    ///
    /// Lock-free: a failed tail compare-exchange means another thread
    /// installed a fresh node, and the retry proceeds through it. A node
    /// allocated by the losing side is abandoned to the arena and
    /// reclaimed at rewind; such nodes are bounded by the number of
    /// contention events and small next to a chunk.
    pub fn push(&self, value: T) {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `tail` always points at a node allocated in
            // `self.pool`, which is borrowed for `'pool` and therefore
            // cannot rewind under us.
            let node = unsafe { &*tail };

            let slot = node.used.fetch_add(1, Ordering::Relaxed);
            if slot < node.capacity {
                // SAFETY: the fetch-add reserved `slot` for this call
                // alone, and `slot < capacity` keeps the write in bounds.
                unsafe { node.data.add(slot).write(value) };
                return;
            }

            // Overshot a full node. The clamp is a hint for observers:
            // stragglers may bump `used` past capacity again, and readers
            // clamp on their side. The bound that matters is re-published
            // by the Release store of `next` below.
            node.used.store(node.capacity, Ordering::Relaxed);

            let fresh = Node::new_in(self.pool, grow_capacity(node.capacity, self.growth_factor));
            if self
                .tail
                .compare_exchange(tail, fresh.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // Publish the successor only after it became the tail:
                // an iterator that sees non-null `next` must also see
                // this node's clamped `used`.
                node.next.store(fresh.as_ptr(), Ordering::Release);
            }
            // Lost the race: `fresh` stays behind in the arena. Retry.
        }
    }

    /// Number of elements appended so far. O(nodes).
    ///
    /// A snapshot under concurrent appends; exact in quiescence.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut total = 0;
        let mut node = self.head.as_ptr().cast_const();
        while !node.is_null() {
            // SAFETY: chain nodes live in the arena until rewind.
            let current = unsafe { &*node };
            total += current.used_prefix();
            node = current.next.load(Ordering::Acquire);
        }
        total
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        // A successor only exists once the head filled up, so an empty
        // head means an empty chain.
        // SAFETY: the head node lives in the arena until rewind.
        unsafe { self.head.as_ref() }.used_prefix() == 0
    }

    /// Most recently appended element in the tail node, or `None` when
    /// nothing has been appended (or the tail is still empty right after
    /// a grow). Meaningful once the appends in question happened-before
    /// this call.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        // SAFETY: see `push` for the tail liveness argument.
        let node = unsafe { &*self.tail.load(Ordering::Acquire) };
        let used = node.used_prefix();
        if used == 0 {
            return None;
        }
        // SAFETY: slots below the used prefix are initialised by the
        // appends that happened-before this call.
        Some(unsafe { &*node.data.add(used - 1) })
    }

    /// Element at `index` in append order, or `None` past the end.
    ///
    /// Walks the chain: O(nodes). Provided for completeness; iterate for
    /// anything hot.
    #[must_use]
    pub fn get(&self, mut index: usize) -> Option<&T> {
        let mut node = self.head.as_ptr().cast_const();
        while !node.is_null() {
            // SAFETY: chain nodes live in the arena until rewind.
            let current = unsafe { &*node };
            let used = current.used_prefix();
            if index < used {
                // SAFETY: `index` is inside this node's initialised
                // prefix.
                return Some(unsafe { &*current.data.add(index) });
            }
            index -= used;
            node = current.next.load(Ordering::Acquire);
        }
        None
    }

    /// Iterates over the elements in append order.
    pub fn iter(&self) -> Iter<'_, T> {
        // SAFETY: the head node lives in the arena until rewind.
        let limit = unsafe { self.head.as_ref() }.used_prefix();
        Iter {
            node: self.head.as_ptr().cast_const(),
            index: 0,
            limit,
            _chain: PhantomData,
        }
    }
}

impl<'s, T: Copy> IntoIterator for &'s AppendVec<'_, T> {
    type Item = &'s T;
    type IntoIter = Iter<'s, T>;

    fn into_iter(self) -> Iter<'s, T> {
        self.iter()
    }
}

/// Forward iterator over an [`AppendVec`]. Single pass; holds a borrow of
/// the sequence, which transitively pins the arena.
pub struct Iter<'a, T: Copy> {
    node: *const Node<T>,
    index: usize,
    /// Used-prefix of `node`, captured when the iterator entered it.
    /// Read before `next` is followed, never re-read.
    limit: usize,
    _chain: PhantomData<&'a T>,
}

impl<'a, T: Copy> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        loop {
            if self.node.is_null() {
                return None;
            }
            // SAFETY: non-null chain pointers reference nodes that live in
            // the arena for at least `'a`.
            let node = unsafe { &*self.node };
            if self.index < self.limit {
                // SAFETY: `index < limit <= capacity`, and the slot was
                // initialised by an append that happened-before the
                // iterator's creation.
                let item = unsafe { &*node.data.add(self.index) };
                self.index += 1;
                return Some(item);
            }
            // This node's prefix is exhausted; follow the chain. The
            // `used` of the successor is read only after the Acquire load
            // of `next` (pairing with the Release publication).
            self.node = node.next.load(Ordering::Acquire);
            self.index = 0;
            self.limit = if self.node.is_null() {
                0
            } else {
                // SAFETY: as above.
                unsafe { &*self.node }.used_prefix()
            };
        }
    }
}

/// Next node capacity: current capacity scaled by the growth factor,
/// and strictly larger so the chain always makes progress.
fn grow_capacity(capacity: usize, factor: f64) -> usize {
    let grown = (capacity as f64 * factor).ceil() as usize;
    grown.max(capacity + 1)
}

// ---------------------------------------------------------------------------
// Test module includes
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "append_vec_tests.rs"]
mod append_vec_tests;

// ---------------------------------------------------------------------------
// Concurrent smoke tests (also valid under Miri / cargo miri test)
// ---------------------------------------------------------------------------
