//! Lock-free arena pool: coarse-grained bump allocation with bulk rewind.
//!
//! # Design
//!
//! [`ArenaPool`] amortises per-object allocation cost by carving small
//! regions out of large slabs ("chunks") obtained from the system
//! allocator. Chunks form a singly-linked stack; the current chunk hands
//! out regions by advancing an atomic cursor, and a chunk that cannot
//! satisfy a request is left as-is while a fresh chunk is pushed on top.
//! Individual regions are never freed. [`ArenaPool::rewind`] releases the
//! whole stack in one walk and resets the pool to its empty state.
//!
//! The intended lifecycle is arena-per-batch: build everything, consume
//! the result, rewind. Callers that need finer-grained freeing should use
//! the system allocator directly.
//!
//! # Invariants
//!
//! - For every chunk: `payload_start <= cursor <= end`, and `cursor` only
//!   moves forward while the chunk is live.
//! - A chunk, once pushed, is never unlinked until `rewind` frees the
//!   entire stack.
//! - Returned regions are disjoint and each lies inside a single chunk's
//!   payload.
//! - `bytes_used() <= bytes_allocated()`; both grow monotonically between
//!   rewinds. `bytes_used` sums *requested* sizes only; alignment padding
//!   is consumed from the chunk but not counted.
//!
//! # Ordering
//!
//! - Pushing a chunk is a `Release` compare-exchange on `top`, paired with
//!   `Acquire` loads of `top`, so a thread that observes a chunk also
//!   observes its initialised header.
//! - The cursor bump is a `Relaxed` compare-exchange: it only reserves a
//!   byte range, and the winner is the sole writer of that range. Readers
//!   of the region's eventual contents synchronise elsewhere (e.g. the
//!   sequence types publish through their own `Release` stores).
//! - The statistics counters are `Relaxed` and may be transiently stale
//!   under concurrent allocation; they are exact in quiescence.
//!
//! # Safety
//!
//! `rewind` takes `&mut self`, so the borrow checker rules out rewinding
//! while any allocation, sequence, or iterator still borrows the pool.
//! Raw pointers handed out by [`ArenaPool::alloc`] do not carry that
//! protection; callers keeping them across a rewind are on their own.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

#[cfg(feature = "system-alloc")]
use std::sync::Mutex;

use crossbeam_utils::CachePadded;
use thiserror::Error;

/// Default slab size for chunk requests to the system allocator.
///
/// Large on purpose: chunk churn is rare, and untouched pages cost only
/// address space until they are written.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 30;

/// Minimum alignment applied to every request. Unaligned integer loads
/// fault on some ARM configurations, so everything is word-aligned there;
/// elsewhere byte packing is allowed.
#[cfg(target_arch = "aarch64")]
pub const MIN_ALIGN: usize = mem::size_of::<usize>();
#[cfg(not(target_arch = "aarch64"))]
pub const MIN_ALIGN: usize = 1;

/// Errors produced by the pool. Allocation is the only fallible operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// The system allocator refused a chunk request.
    #[error(
        "arena out of memory: {requested} bytes requested, {used} bytes used, \
         {allocated} bytes allocated"
    )]
    OutOfMemory {
        /// Size of the failed request in bytes.
        requested: usize,
        /// Bytes handed out by the pool so far.
        used: usize,
        /// Bytes obtained from the system allocator so far.
        allocated: usize,
    },
}

/// Header at the start of every slab. The payload follows immediately.
///
/// `next` and `capacity` are written once before the chunk is published
/// and never change; `cursor` is the only field mutated afterwards.
#[repr(C)]
struct ChunkHeader {
    /// Next free byte within this chunk's payload.
    cursor: AtomicPtr<u8>,
    /// One past the last payload byte (slab start + capacity).
    end: *mut u8,
    /// The previously-current chunk, forming a stack. Null at the bottom.
    next: *mut ChunkHeader,
    /// Full slab size in bytes, header included. Needed to rebuild the
    /// deallocation layout at rewind.
    capacity: usize,
}

const HEADER_SIZE: usize = mem::size_of::<ChunkHeader>();
const CHUNK_ALIGN: usize = mem::align_of::<ChunkHeader>();

// The payload starts at slab + HEADER_SIZE. Keeping that offset
// word-aligned means the aarch64 alignment floor holds for the first
// allocation without extra padding.
const _: () = assert!(HEADER_SIZE % mem::size_of::<usize>() == 0);

/// Bytes needed to advance `addr` to the next multiple of `align`.
/// `align` must be a power of two.
#[cfg(not(feature = "system-alloc"))]
#[inline]
fn padding_for(addr: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    addr.wrapping_neg() & (align - 1)
}

/// Thread-safe bump allocator over a stack of large chunks.
///
/// Any number of threads may call [`alloc`](Self::alloc) concurrently;
/// they receive disjoint regions. There is no per-region free: the whole
/// pool is reclaimed at once by [`rewind`](Self::rewind) or on drop.
///
/// # Examples
///
/// ```
/// use memarena_rs::ArenaPool;
///
/// let pool = ArenaPool::with_block_size(4096);
/// let ptr = pool.alloc(64, 8);
/// assert_eq!(ptr.as_ptr() as usize % 8, 0);
/// assert_eq!(pool.bytes_used(), 64);
/// ```
pub struct ArenaPool {
    /// Top of the chunk stack. Null while the pool is empty.
    top: AtomicPtr<ChunkHeader>,
    /// Sum of requested sizes handed out since the last rewind.
    used: CachePadded<AtomicUsize>,
    /// Sum of slab sizes obtained from the system allocator.
    allocated: CachePadded<AtomicUsize>,
    /// Payload size used for ordinary chunk requests.
    block_size: usize,
    /// Individually tracked allocations for the leak-detector mode.
    #[cfg(feature = "system-alloc")]
    direct: Mutex<Vec<DirectAlloc>>,
}

// SAFETY: the chunk stack and cursors are only mutated through atomics,
// regions are handed out exclusively, and the operations that assume
// sole ownership (rewind, drop) take `&mut self`.
unsafe impl Send for ArenaPool {}
unsafe impl Sync for ArenaPool {}

impl ArenaPool {
    /// Creates an empty pool using [`DEFAULT_BLOCK_SIZE`] chunks.
    ///
    /// No memory is requested until the first allocation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Creates an empty pool whose ordinary chunk requests have a payload
    /// of `block_size` bytes. A single allocation larger than this is
    /// honoured by sizing that one chunk to fit.
    #[must_use]
    pub fn with_block_size(block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        Self {
            top: AtomicPtr::new(ptr::null_mut()),
            used: CachePadded::new(AtomicUsize::new(0)),
            allocated: CachePadded::new(AtomicUsize::new(0)),
            block_size,
            #[cfg(feature = "system-alloc")]
            direct: Mutex::new(Vec::new()),
        }
    }

    /// Payload size of ordinary chunk requests.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sum of the sizes of all allocations since the last rewind.
    ///
    /// Alignment padding is excluded: this counter tracks logical demand,
    /// not physical consumption. Transiently stale under concurrent
    /// allocation; exact once all allocating threads are quiescent.
    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Total bytes requested from the system allocator since the last
    /// rewind, chunk headers included.
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Allocates `size` bytes aligned to `align` (a power of two).
    ///
    /// The region is valid until the next [`rewind`](Self::rewind) or the
    /// pool is dropped. Concurrent callers receive disjoint regions.
    ///
    /// Out of memory is fatal here: the failure is logged and the process
    /// is terminated, because everything allocated so far already depends
    /// on this pool. Use [`try_alloc`](Self::try_alloc) to handle the
    /// failure instead.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn alloc(&self, size: usize, align: usize) -> NonNull<u8> {
        match self.try_alloc(size, align) {
            Ok(region) => region,
            Err(err) => {
                log::error!("fatal: {err}");
                let layout = Layout::from_size_align(size.max(1), align)
                    .unwrap_or_else(|_| Layout::new::<u8>());
                handle_alloc_error(layout);
            }
        }
    }

    /// Allocates `size` bytes aligned to `align`, surfacing out-of-memory
    /// to the caller instead of terminating.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn try_alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, ArenaError> {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        let align = align.max(MIN_ALIGN);

        #[cfg(feature = "system-alloc")]
        return self.alloc_direct(size, align);

        #[cfg(not(feature = "system-alloc"))]
        self.alloc_bump(size, align)
    }

    /// Allocates uninitialised storage for `len` values of `T`.
    ///
    /// The returned memory is valid for `len` writes of `T` until the next
    /// rewind. No destructor will ever run for values placed there.
    pub fn alloc_array<T>(&self, len: usize) -> NonNull<T> {
        let bytes = mem::size_of::<T>()
            .checked_mul(len)
            .expect("array byte size overflows usize");
        self.alloc(bytes, mem::align_of::<T>()).cast()
    }

    /// Releases every chunk back to the system allocator and resets the
    /// counters to zero.
    ///
    /// Taking `&mut self` makes the single-owner requirement structural:
    /// no allocation, sequence, or iterator borrowing this pool can be
    /// alive across the call. Every pointer previously returned by
    /// [`alloc`](Self::alloc) is dangling afterwards.
    pub fn rewind(&mut self) {
        #[cfg(feature = "system-alloc")]
        self.release_direct();

        self.release_chunks();
        *self.used.get_mut() = 0;
        *self.allocated.get_mut() = 0;
    }

    /// Lock-free fast path: bump the top chunk's cursor, pushing a fresh
    /// chunk whenever the current one cannot satisfy the request.
    #[cfg(not(feature = "system-alloc"))]
    fn alloc_bump(&self, size: usize, align: usize) -> Result<NonNull<u8>, ArenaError> {
        loop {
            let top = self.top.load(Ordering::Acquire);
            if !top.is_null() {
                // SAFETY: a non-null `top` points at a chunk header
                // initialised before its Release publication, and chunks
                // stay live until rewind, which requires `&mut self`.
                let chunk = unsafe { &*top };
                let cursor = chunk.cursor.load(Ordering::Relaxed);
                let padding = padding_for(cursor as usize, align);
                let remaining = (chunk.end as usize) - (cursor as usize);
                // Checked: a pathological `size` near usize::MAX must fall
                // through to the chunk path and fail there, not wrap.
                if let Some(advance) = size.checked_add(padding).filter(|&a| a <= remaining) {
                    // SAFETY: `cursor + advance <= end`, checked above, so
                    // the offset stays inside this chunk's slab.
                    let next = unsafe { cursor.add(advance) };
                    if chunk
                        .cursor
                        .compare_exchange_weak(cursor, next, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                    {
                        self.used.fetch_add(size, Ordering::Relaxed);
                        // SAFETY: the compare-exchange reserved
                        // `[cursor + padding, cursor + advance)` for this
                        // caller alone; the base is non-null because it
                        // lies inside a live slab.
                        return Ok(unsafe { NonNull::new_unchecked(cursor.add(padding)) });
                    }
                    // Another thread moved the cursor first.
                    continue;
                }
            }

            // Empty pool, or the request does not fit in the remaining
            // payload. Tail wastage is accepted: scanning old chunks for a
            // gap would put a search on the fast path.
            let reserve = size.checked_add(align).ok_or_else(|| self.oom(size))?;
            self.push_chunk(reserve)?;
        }
    }

    /// Requests a slab holding at least `payload` bytes and pushes it onto
    /// the chunk stack. Losing the push race is not an error: the winner's
    /// chunk serves the retry and the loser's slab goes straight back.
    #[cfg(not(feature = "system-alloc"))]
    fn push_chunk(&self, payload: usize) -> Result<(), ArenaError> {
        let request = self
            .block_size
            .max(payload)
            .checked_add(HEADER_SIZE)
            .ok_or_else(|| self.oom(payload))?;
        let layout =
            Layout::from_size_align(request, CHUNK_ALIGN).map_err(|_| self.oom(request))?;

        // SAFETY: `layout` has non-zero size (HEADER_SIZE > 0).
        let slab = unsafe { alloc(layout) };
        let Some(slab) = NonNull::new(slab) else {
            return Err(self.oom(request));
        };

        let header = slab.as_ptr().cast::<ChunkHeader>();
        let observed = self.top.load(Ordering::Acquire);
        // SAFETY: the slab is a fresh allocation of `request >=
        // HEADER_SIZE` bytes, aligned for `ChunkHeader`.
        unsafe {
            ptr::write(
                header,
                ChunkHeader {
                    cursor: AtomicPtr::new(slab.as_ptr().add(HEADER_SIZE)),
                    end: slab.as_ptr().add(request),
                    next: observed,
                    capacity: request,
                },
            );
        }

        match self
            .top
            .compare_exchange(observed, header, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => {
                self.allocated.fetch_add(request, Ordering::Relaxed);
                log::debug!(
                    "arena chunk pushed: {request} bytes ({} payload)",
                    request - HEADER_SIZE
                );
            }
            Err(_) => {
                // A concurrent allocator pushed a chunk in the meantime;
                // this slab was never published, so hand it straight back.
                // SAFETY: same pointer and layout as the `alloc` above.
                unsafe { dealloc(slab.as_ptr(), layout) };
            }
        }
        Ok(())
    }

    /// Walks the chunk stack, returning every slab to the system
    /// allocator. Exclusive access via `&mut self`.
    fn release_chunks(&mut self) {
        let mut chain = *self.top.get_mut();
        while !chain.is_null() {
            // SAFETY: `chain` was written by `push_chunk` and has not been
            // freed; `&mut self` keeps every other thread out.
            let (next, capacity) = unsafe { ((*chain).next, (*chain).capacity) };
            let layout = Layout::from_size_align(capacity, CHUNK_ALIGN)
                .expect("chunk layout was valid at allocation time");
            // SAFETY: `chain` points at the slab base; layout matches the
            // original request.
            unsafe { dealloc(chain.cast(), layout) };
            chain = next;
        }
        *self.top.get_mut() = ptr::null_mut();
    }

    fn oom(&self, requested: usize) -> ArenaError {
        ArenaError::OutOfMemory {
            requested,
            used: self.bytes_used(),
            allocated: self.bytes_allocated(),
        }
    }

    /// Leak-detector mode: one system allocation per request, tracked in a
    /// mutex-guarded list so rewind can free them individually.
    #[cfg(feature = "system-alloc")]
    fn alloc_direct(&self, size: usize, align: usize) -> Result<NonNull<u8>, ArenaError> {
        // Zero-size requests still need a distinct, aligned pointer.
        let layout = Layout::from_size_align(size.max(1), align).map_err(|_| self.oom(size))?;
        // SAFETY: `layout` has non-zero size.
        let raw = unsafe { alloc(layout) };
        let Some(region) = NonNull::new(raw) else {
            return Err(self.oom(size));
        };

        self.used.fetch_add(size, Ordering::Relaxed);
        self.allocated.fetch_add(layout.size(), Ordering::Relaxed);
        self.direct
            .lock()
            .expect("direct allocation list poisoned")
            .push(DirectAlloc {
                ptr: region.as_ptr(),
                layout,
            });
        Ok(region)
    }

    #[cfg(feature = "system-alloc")]
    fn release_direct(&mut self) {
        let entries = self
            .direct
            .get_mut()
            .expect("direct allocation list poisoned");
        for entry in entries.drain(..) {
            // SAFETY: `entry` was produced by `alloc_direct` with exactly
            // this pointer/layout pair and has not been freed.
            unsafe { dealloc(entry.ptr, entry.layout) };
        }
    }
}

impl Default for ArenaPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ArenaPool {
    fn drop(&mut self) {
        self.rewind();
    }
}

impl fmt::Debug for ArenaPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaPool")
            .field("block_size", &self.block_size)
            .field("bytes_used", &self.bytes_used())
            .field("bytes_allocated", &self.bytes_allocated())
            .finish_non_exhaustive()
    }
}

/// One entry in the leak-detector mode's allocation list.
#[cfg(feature = "system-alloc")]
struct DirectAlloc {
    ptr: *mut u8,
    layout: Layout,
}

// SAFETY: the pointer is only dereferenced to free it, under `&mut self`.
#[cfg(feature = "system-alloc")]
unsafe impl Send for DirectAlloc {}

// ---------------------------------------------------------------------------
// Test module includes
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "pool_tests.rs"]
mod pool_tests;

// ---------------------------------------------------------------------------
// Concurrent smoke tests (also valid under Miri / cargo miri test)
// ---------------------------------------------------------------------------
