//! Batch-lifecycle tests: build, read, rewind, rebuild.
//!
//! The pool is meant to live one batch at a time. These tests run several
//! batches over a single pool and check that each starts from a clean
//! slate.

use memarena_rs::{AppendVec, ArenaPool, VarintVec};

#[test]
fn rewind_between_batches_resets_everything() {
    let mut pool = ArenaPool::with_block_size(1 << 16);

    for batch in 0..5u32 {
        {
            let seq = AppendVec::new(&pool);
            let ints = VarintVec::new(&pool);
            for i in 0..2_000 {
                seq.push(batch * 10_000 + i);
                ints.push(batch * 10_000 + i);
            }
            assert_eq!(seq.len(), 2_000);
            assert_eq!(ints.iter().count(), 2_000);
            assert!(seq.iter().zip(ints.iter()).all(|(&a, b)| a == b));
        }
        // Sequences are gone; the batch is over.
        assert!(pool.bytes_used() > 0);
        pool.rewind();
        assert_eq!(pool.bytes_used(), 0);
        assert_eq!(pool.bytes_allocated(), 0);
    }
}

#[test]
fn dropping_the_pool_is_a_rewind() {
    let pool = ArenaPool::with_block_size(1 << 12);
    let seq = AppendVec::new(&pool);
    for i in 0..10_000u32 {
        seq.push(i);
    }
    assert_eq!(seq.len(), 10_000);
    // Leak checkers verify all chunks come back here.
    drop(seq);
    drop(pool);
}

#[test]
fn empty_pool_rewind_is_a_no_op() {
    let mut pool = ArenaPool::new();
    pool.rewind();
    pool.rewind();
    assert_eq!(pool.bytes_used(), 0);
    assert_eq!(pool.bytes_allocated(), 0);
}

#[test]
fn default_construction_starts_empty() {
    let pool = ArenaPool::new();
    assert_eq!(pool.block_size(), memarena_rs::pool::DEFAULT_BLOCK_SIZE);
    // Construction must not touch the system allocator.
    assert_eq!(pool.bytes_allocated(), 0);
}
