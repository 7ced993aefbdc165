/*!
 * Property Tests
 * Randomized allocate/release sequences preserve the accounting invariants
 */

use memsentry::SentryAllocator;
use proptest::collection::vec;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balanced_sequences_leave_no_residue(sizes in vec(1usize..512, 1..40)) {
        let allocator = SentryAllocator::new();
        let expected_bytes: usize = sizes.iter().sum();

        let blocks: Vec<(*mut u8, usize)> = sizes
            .iter()
            .map(|&size| (allocator.allocate(size).unwrap(), size))
            .collect();

        prop_assert_eq!(allocator.num_blocks_in_use(), sizes.len() as u64);
        prop_assert_eq!(allocator.num_bytes_in_use(), expected_bytes as u64);
        prop_assert_eq!(allocator.num_blocks_max(), sizes.len() as u64);

        for &(ptr, size) in &blocks {
            unsafe { ptr.write_bytes(0xC3, size) };
            unsafe { allocator.deallocate(ptr) };
        }

        prop_assert_eq!(allocator.num_blocks_in_use(), 0);
        prop_assert_eq!(allocator.num_bytes_in_use(), 0);
        prop_assert_eq!(allocator.num_bytes_total(), expected_bytes as u64);
        prop_assert_eq!(allocator.num_mismatches(), 0);
        prop_assert_eq!(allocator.num_bounds_errors(), 0);
        prop_assert_eq!(allocator.status(), 0);
    }

    #[test]
    fn interleaved_release_orders_keep_the_list_consistent(
        sizes in vec(1usize..256, 2..30),
        release_first_pass in vec(any::<bool>(), 2..30),
    ) {
        let allocator = SentryAllocator::new();

        let mut live: Vec<(*mut u8, usize)> = sizes
            .iter()
            .map(|&size| (allocator.allocate(size).unwrap(), size))
            .collect();

        // First pass releases an arbitrary subset, unlinking from arbitrary
        // positions; the second pass drains the remainder.
        let mut kept = Vec::new();
        for (i, entry) in live.drain(..).enumerate() {
            if *release_first_pass.get(i).unwrap_or(&false) {
                unsafe { allocator.deallocate(entry.0) };
            } else {
                kept.push(entry);
            }
        }
        for (ptr, _) in kept {
            unsafe { allocator.deallocate(ptr) };
        }

        prop_assert_eq!(allocator.num_blocks_in_use(), 0);
        prop_assert_eq!(allocator.num_allocations(), sizes.len() as u64);
        prop_assert_eq!(allocator.num_deallocations(), sizes.len() as u64);
        prop_assert_eq!(allocator.status(), 0);
    }
}
