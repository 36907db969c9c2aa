//! Grow-only concurrent sequence of `u32` values, varint-compressed.
//!
//! # Design
//!
//! A [`VarintVec`] is the byte-oriented sibling of
//! [`AppendVec`](crate::AppendVec): the same arena-backed chain of
//! fixed-capacity nodes, but each append stores the value's
//! [varint](crate::varint) bytes instead of a fixed-layout element.
//!
//! An append reserves its full encoded length in the tail node with one
//! compare-exchange on `used`, so a varint never straddles two nodes and
//! two appends never interleave their bytes. Every node's used prefix is
//! therefore a self-contained stream of complete varints, and the decoder
//! needs no state to resume at a node boundary.
//!
//! # Ordering
//!
//! Identical to `AppendVec`: `Relaxed` reservation (the winner owns the
//! reserved byte range exclusively), `AcqRel` tail replacement, `Release`
//! publication of `next` paired with `Acquire` reader loads. Unlike the
//! generic sequence, `used` can never exceed `capacity` here, because
//! the compare-exchange refuses reservations that would not fit.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::pool::ArenaPool;
use crate::varint;

/// Capacity multiplier applied when a new tail node is allocated.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;

/// One link in the chain: a fixed-capacity byte slice plus bookkeeping.
struct ByteNode {
    /// Start of this node's byte storage in the arena.
    data: *mut u8,
    /// Byte capacity. Immutable.
    capacity: usize,
    /// Bytes written so far. Always `<= capacity`.
    used: AtomicUsize,
    /// Successor node. Null until this node stops accepting appends;
    /// written once.
    next: AtomicPtr<ByteNode>,
}

impl ByteNode {
    fn new_in(pool: &ArenaPool, capacity: usize) -> NonNull<ByteNode> {
        let data = pool.alloc_array::<u8>(capacity).as_ptr();
        let node = pool.alloc_array::<ByteNode>(1);
        // SAFETY: `node` is a fresh, properly aligned arena region sized
        // for one `ByteNode`.
        unsafe {
            ptr::write(
                node.as_ptr(),
                ByteNode {
                    data,
                    capacity,
                    used: AtomicUsize::new(0),
                    next: AtomicPtr::new(ptr::null_mut()),
                },
            );
        }
        node
    }
}

/// Thread-safe grow-only sequence of `u32` values stored as varints.
///
/// Appends from any number of threads interleave in reservation order;
/// each thread's own appends keep their program order. Iteration decodes
/// forward only; there is no random access into a compressed stream.
///
/// # Examples
///
/// ```
/// use memarena_rs::{ArenaPool, VarintVec};
///
/// let pool = ArenaPool::with_block_size(4096);
/// let seq = VarintVec::new(&pool);
/// seq.push(0);
/// seq.push(300);
/// seq.push(u32::MAX);
/// assert_eq!(seq.iter().collect::<Vec<_>>(), vec![0, 300, u32::MAX]);
/// ```
pub struct VarintVec<'pool> {
    pool: &'pool ArenaPool,
    /// First node. Immutable after construction.
    head: NonNull<ByteNode>,
    /// Last node; appends target this one.
    tail: AtomicPtr<ByteNode>,
    growth_factor: f64,
}

// SAFETY: shared mutation goes through atomics, reserved byte ranges are
// written exclusively by their reserving thread, and node memory lives in
// the arena, which outlives `self`.
unsafe impl Send for VarintVec<'_> {}
unsafe impl Sync for VarintVec<'_> {}

impl<'pool> VarintVec<'pool> {
    /// Creates a sequence with a single-byte first node and the default
    /// growth factor. The first few appends grow the chain rapidly; pick
    /// [`with_capacity`](Self::with_capacity) when the rough size is known.
    pub fn new(pool: &'pool ArenaPool) -> Self {
        Self::with_capacity(pool, 1, DEFAULT_GROWTH_FACTOR)
    }

    /// Creates a sequence whose first node holds `initial_capacity` bytes
    /// and whose nodes grow by `growth_factor`.
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
        let head = ByteNode::new_in(pool, initial_capacity);
        Self {
            pool,
            head,
            tail: AtomicPtr::new(head.as_ptr()),
            growth_factor,
        }
    }

    /// Appends `value`, encoding it as one to five varint bytes.
    ///
    /// Lock-free: reservation retries only on contention, and a full tail
    /// is replaced through the same compare-exchange discipline as the
    /// generic sequence.
    pub fn push(&self, value: u32) {
        let mut buf = [0u8; varint::MAX_LEN];
        let len = varint::encode(value, &mut buf);

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `tail` always points at a node allocated in
            // `self.pool`, which cannot rewind while borrowed here.
            let node = unsafe { &*tail };

            let mut used = node.used.load(Ordering::Relaxed);
            while used + len <= node.capacity {
                match node.used.compare_exchange_weak(
                    used,
                    used + len,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the compare-exchange reserved
                        // `[used, used + len)` for this call alone, in
                        // bounds by the loop condition.
                        unsafe {
                            ptr::copy_nonoverlapping(buf.as_ptr(), node.data.add(used), len)
                        };
                        return;
                    }
                    Err(actual) => used = actual,
                }
            }

            // Not enough room for this value's bytes: install a larger
            // successor. The gap at the end of the old node stays unused;
            // readers stop at `used`, so it is never decoded.
            let fresh =
                ByteNode::new_in(self.pool, grow_capacity(node.capacity, self.growth_factor));
            if self
                .tail
                .compare_exchange(tail, fresh.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                node.next.store(fresh.as_ptr(), Ordering::Release);
            }
            // Lost the race: `fresh` stays behind in the arena. Retry.
        }
    }

    /// Total encoded bytes across the chain. O(nodes).
    ///
    /// A snapshot under concurrent appends; exact in quiescence.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        let mut total = 0;
        let mut node = self.head.as_ptr().cast_const();
        while !node.is_null() {
            // SAFETY: chain nodes live in the arena until rewind.
            let current = unsafe { &*node };
            total += current.used.load(Ordering::Acquire);
            node = current.next.load(Ordering::Acquire);
        }
        total
    }

    /// Decodes the appended values in order.
    pub fn iter(&self) -> Iter<'_> {
        // SAFETY: the head node lives in the arena until rewind.
        let limit = unsafe { self.head.as_ref() }.used.load(Ordering::Acquire);
        Iter {
            node: self.head.as_ptr().cast_const(),
            offset: 0,
            limit,
            _chain: PhantomData,
        }
    }
}

impl<'s> IntoIterator for &'s VarintVec<'_> {
    type Item = u32;
    type IntoIter = Iter<'s>;

    fn into_iter(self) -> Iter<'s> {
        self.iter()
    }
}

/// Forward decoding iterator over a [`VarintVec`].
///
/// Holds `(node, offset)` plus the node's used-prefix length, captured
/// once on entry to each node. Yields each appended value exactly once,
/// in reservation order.
pub struct Iter<'a> {
    node: *const ByteNode,
    offset: usize,
    /// Used-prefix of `node`, captured when the iterator entered it.
    limit: usize,
    _chain: PhantomData<&'a ByteNode>,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        // Skip nodes whose prefix is exhausted, including freshly linked
        // successors that nobody has written to yet.
        while self.offset >= self.limit {
            if self.node.is_null() {
                return None;
            }
            // SAFETY: non-null chain pointers reference nodes that live in
            // the arena for at least `'a`. `used` of the successor is read
            // only after the Acquire load of `next`.
            let node = unsafe { &*self.node };
            self.node = node.next.load(Ordering::Acquire);
            self.offset = 0;
            self.limit = if self.node.is_null() {
                0
            } else {
                // SAFETY: as above.
                unsafe { &*self.node }.used.load(Ordering::Acquire)
            };
        }

        // SAFETY: `offset < limit <= capacity`, and every byte below the
        // limit was written by an append that happened-before the
        // iterator's creation. Appends never straddle nodes, so the
        // terminal byte of this varint is inside the same prefix.
        let node = unsafe { &*self.node };
        let mut byte = unsafe { *node.data.add(self.offset) };
        self.offset += 1;
        let mut value = u32::from(byte & 0x7f);
        let mut shift = 7u32;
        while byte & 0x80 != 0 {
            debug_assert!(self.offset < self.limit, "varint truncated inside a node");
            // SAFETY: continuation bytes of a reserved varint stay inside
            // the node's used prefix.
            byte = unsafe { *node.data.add(self.offset) };
            self.offset += 1;
            value |= u32::from(byte & 0x7f) << shift;
            shift += 7;
        }
        Some(value)
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
#[path = "varint_vec_tests.rs"]
mod varint_vec_tests;

// ---------------------------------------------------------------------------
// Concurrent smoke tests (also valid under Miri / cargo miri test)
// ---------------------------------------------------------------------------
