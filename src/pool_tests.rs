//! Property tests and unit tests for [`ArenaPool`].
//!
//! Verifies:
//! - Alignment of every returned region
//! - Disjointness across arbitrary allocation sequences
//! - Counter accounting (`bytes_used` excludes padding)
//! - Rewind semantics and chunk spill behaviour

use super::ArenaPool;

// ============================================
// Property tests
// ============================================

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Every region is aligned, disjoint from all others, and the
        /// used counter sums exactly the requested sizes.
        #[test]
        fn alloc_is_aligned_disjoint_and_counted(
            requests in prop::collection::vec((0usize..256, 0u32..6), 1..64),
        ) {
            let pool = ArenaPool::with_block_size(512);
            let mut regions: Vec<(usize, usize)> = Vec::new();
            let mut requested = 0usize;

            for &(size, align_pow) in &requests {
                let align = 1usize << align_pow;
                let region = pool.alloc(size, align);
                let addr = region.as_ptr() as usize;
                prop_assert_eq!(addr % align, 0, "misaligned region");
                regions.push((addr, size));
                requested += size;
            }

            prop_assert_eq!(pool.bytes_used(), requested);
            prop_assert!(pool.bytes_allocated() >= pool.bytes_used());

            regions.sort_unstable();
            for pair in regions.windows(2) {
                let (addr, size) = pair[0];
                prop_assert!(addr + size <= pair[1].0, "overlapping regions");
            }
        }

        /// Rewind always restores the empty state, and the pool is
        /// reusable afterwards.
        #[test]
        fn rewind_resets_and_pool_is_reusable(
            sizes in prop::collection::vec(1usize..128, 1..32),
        ) {
            let mut pool = ArenaPool::with_block_size(256);
            for &size in &sizes {
                pool.alloc(size, 1);
            }
            pool.rewind();
            prop_assert_eq!(pool.bytes_used(), 0);
            prop_assert_eq!(pool.bytes_allocated(), 0);

            let region = pool.alloc(64, 8);
            prop_assert_eq!(region.as_ptr() as usize % 8, 0);
            prop_assert_eq!(pool.bytes_used(), 64);
        }
    }
}

// ============================================
// Unit tests
// ============================================

mod unit_tests {
    use super::*;

    /// Writes a distinct pattern into a region and checks it back.
    fn fill_and_check(region: std::ptr::NonNull<u8>, size: usize, pattern: u8) {
        // SAFETY: the region was freshly allocated with `size` bytes and
        // is exclusive to this test.
        unsafe {
            std::ptr::write_bytes(region.as_ptr(), pattern, size);
            let bytes = std::slice::from_raw_parts(region.as_ptr(), size);
            assert!(bytes.iter().all(|&b| b == pattern));
        }
    }

    #[test]
    fn three_regions_then_rewind() {
        let mut pool = ArenaPool::with_block_size(4096);

        let a = pool.alloc(100, 1);
        let b = pool.alloc(200, 1);
        let c = pool.alloc(50, 1);
        assert_eq!(pool.bytes_used(), 350);

        fill_and_check(a, 100, 0xAA);
        fill_and_check(b, 200, 0xBB);
        fill_and_check(c, 50, 0xCC);

        // Patterns must coexist: re-read after all writes.
        // SAFETY: regions are live and disjoint.
        unsafe {
            assert!(std::slice::from_raw_parts(a.as_ptr(), 100)
                .iter()
                .all(|&x| x == 0xAA));
            assert!(std::slice::from_raw_parts(b.as_ptr(), 200)
                .iter()
                .all(|&x| x == 0xBB));
        }

        pool.rewind();
        assert_eq!(pool.bytes_used(), 0);
        assert_eq!(pool.bytes_allocated(), 0);
    }

    #[test]
    fn spill_into_second_chunk() {
        let pool = ArenaPool::with_block_size(48);

        pool.alloc(16, 1);
        pool.alloc(16, 1);
        pool.alloc(16, 1);
        let first_chunk = pool.bytes_allocated();
        assert!(first_chunk >= 48);

        // The fourth region cannot fit in the 48-byte payload.
        pool.alloc(16, 1);
        assert_eq!(pool.bytes_allocated(), 2 * first_chunk);
        assert_eq!(pool.bytes_used(), 64);
    }

    #[test]
    fn oversized_request_gets_its_own_chunk() {
        let pool = ArenaPool::with_block_size(64);
        let region = pool.alloc(1000, 1);
        fill_and_check(region, 1000, 0x5A);
        assert_eq!(pool.bytes_used(), 1000);
        assert!(pool.bytes_allocated() >= 1000);
    }

    #[test]
    fn zero_size_allocation() {
        let pool = ArenaPool::with_block_size(128);
        let first = pool.alloc(0, 1);
        let second = pool.alloc(0, 8);
        assert_eq!(second.as_ptr() as usize % 8, 0);
        // Zero-length regions may share an address; both must be usable
        // as (empty) slices.
        // SAFETY: zero-length views of valid pointers.
        unsafe {
            assert!(std::slice::from_raw_parts(first.as_ptr(), 0).is_empty());
        }
        assert_eq!(pool.bytes_used(), 0);
    }

    #[test]
    fn alignment_is_honoured_across_powers() {
        let pool = ArenaPool::with_block_size(4096);
        // A one-byte region first, so later requests start misaligned.
        pool.alloc(1, 1);
        for align_pow in 0..8 {
            let align = 1usize << align_pow;
            let region = pool.alloc(3, align);
            assert_eq!(
                region.as_ptr() as usize % align,
                0,
                "align {align} violated"
            );
            pool.alloc(1, 1);
        }
    }

    #[test]
    fn used_counter_excludes_padding() {
        let pool = ArenaPool::with_block_size(4096);
        pool.alloc(1, 1);
        // Seven bytes of padding are consumed here but not counted.
        pool.alloc(8, 8);
        assert_eq!(pool.bytes_used(), 9);
    }

    #[test]
    fn counters_start_at_zero_and_grow_monotonically() {
        let pool = ArenaPool::with_block_size(256);
        assert_eq!(pool.bytes_used(), 0);
        assert_eq!(pool.bytes_allocated(), 0);

        let mut last_used = 0;
        let mut last_allocated = 0;
        for size in [1usize, 17, 64, 200, 3] {
            pool.alloc(size, 1);
            assert!(pool.bytes_used() > last_used);
            assert!(pool.bytes_allocated() >= last_allocated);
            last_used = pool.bytes_used();
            last_allocated = pool.bytes_allocated();
        }
        assert!(pool.bytes_used() <= pool.bytes_allocated());
    }

    #[test]
    fn try_alloc_succeeds_on_reasonable_requests() {
        let pool = ArenaPool::with_block_size(128);
        let region = pool.try_alloc(64, 16).expect("in-memory request");
        assert_eq!(region.as_ptr() as usize % 16, 0);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_alignment_is_rejected() {
        let pool = ArenaPool::with_block_size(128);
        let _ = pool.alloc(8, 3);
    }

    #[test]
    fn drop_releases_without_explicit_rewind() {
        // Exercises the Drop path; failures show up under leak checkers.
        let pool = ArenaPool::with_block_size(64);
        for _ in 0..32 {
            pool.alloc(20, 1);
        }
        drop(pool);
    }
}
