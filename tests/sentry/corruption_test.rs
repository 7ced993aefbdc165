/*!
 * Corruption Detection Tests
 * Bounds and identity faults observed through the error counters
 *
 * Every allocator here runs in quiet mode: faults are counted, nothing is
 * printed, and the process never aborts, which is how a harness inspects
 * error paths programmatically.
 */

use std::sync::Arc;

use memsentry::SentryAllocator;
use pretty_assertions::assert_eq;

use crate::support::RetainingAllocator;

fn quiet_allocator() -> SentryAllocator {
    let allocator = SentryAllocator::new();
    allocator.set_quiet(true);
    allocator
}

#[test]
fn one_byte_overrun_is_a_bounds_error() {
    let allocator = quiet_allocator();
    let ptr = allocator.allocate(40).unwrap();

    // Clobber the first trailing-sentinel byte, exactly one past the end.
    unsafe { ptr.add(40).write(0) };
    unsafe { allocator.deallocate(ptr) };

    assert_eq!(allocator.num_bounds_errors(), 1);
    assert_eq!(allocator.num_mismatches(), 0);
    // The faulty block was not released.
    assert_eq!(allocator.num_deallocations(), 0);
    assert_eq!(allocator.num_blocks_in_use(), 1);
    assert_eq!(allocator.status(), 1);
}

#[test]
fn underrun_is_a_bounds_error() {
    let allocator = quiet_allocator();
    let ptr = allocator.allocate(16).unwrap();

    unsafe { ptr.sub(1).write(0xFF) };
    unsafe { allocator.deallocate(ptr) };

    assert_eq!(allocator.num_bounds_errors(), 1);
    assert_eq!(allocator.num_mismatches(), 0);
    assert_eq!(allocator.num_blocks_in_use(), 1);
}

#[test]
fn writing_the_whole_segment_is_not_a_fault() {
    let allocator = quiet_allocator();
    let ptr = allocator.allocate(256).unwrap();

    // Every byte of the user segment, including both ends, is fair game.
    unsafe { ptr.write_bytes(0xEE, 256) };
    unsafe { allocator.deallocate(ptr) };

    assert_eq!(allocator.num_bounds_errors(), 0);
    assert_eq!(allocator.num_mismatches(), 0);
    assert_eq!(allocator.status(), 0);
}

#[test]
fn double_free_is_a_mismatch() {
    let upstream = Arc::new(RetainingAllocator::new());
    let allocator = SentryAllocator::with_upstream(upstream.clone());
    allocator.set_quiet(true);

    let ptr = allocator.allocate(32).unwrap();
    unsafe { allocator.deallocate(ptr) };
    assert_eq!(allocator.num_deallocations(), 1);
    assert_eq!(upstream.retained_count(), 1);

    // The retaining upstream keeps the released header readable, so the
    // second free deterministically sees the released tag.
    unsafe { allocator.deallocate(ptr) };
    assert_eq!(allocator.num_mismatches(), 1);
    assert_eq!(allocator.num_bounds_errors(), 0);
    assert_eq!(allocator.num_deallocations(), 1);
    // Nothing further went upstream.
    assert_eq!(upstream.retained_count(), 1);
}

#[test]
fn foreign_pointer_is_an_identity_error_not_a_bounds_error() {
    let owner = SentryAllocator::with_name("owner");
    let stranger = quiet_allocator();

    let ptr = owner.allocate(64).unwrap();
    unsafe { stranger.deallocate(ptr) };

    assert_eq!(stranger.num_mismatches(), 1);
    assert_eq!(stranger.num_bounds_errors(), 0);
    assert_eq!(stranger.num_deallocations(), 0);

    // The rightful owner can still release the block normally.
    unsafe { owner.deallocate(ptr) };
    assert_eq!(owner.num_mismatches(), 0);
    assert_eq!(owner.status(), 0);
}

#[test]
fn misaligned_pointer_is_a_mismatch() {
    let allocator = quiet_allocator();
    let ptr = allocator.allocate(24).unwrap();

    unsafe { allocator.deallocate(ptr.wrapping_add(1)) };
    assert_eq!(allocator.num_mismatches(), 1);
    assert_eq!(allocator.num_bounds_errors(), 0);

    unsafe { allocator.deallocate(ptr) };
    assert_eq!(allocator.num_deallocations(), 1);
    assert_eq!(allocator.num_blocks_in_use(), 0);
}

#[test]
fn memory_never_allocated_here_is_a_mismatch() {
    let allocator = quiet_allocator();

    // An aligned, zeroed buffer: the would-be header reads as garbage magic.
    #[repr(C, align(16))]
    struct Buffer([u8; 128]);
    let mut buffer = Buffer([0; 128]);
    let bogus = unsafe { buffer.0.as_mut_ptr().add(64) };

    unsafe { allocator.deallocate(bogus) };
    assert_eq!(allocator.num_mismatches(), 1);
    assert_eq!(allocator.num_bounds_errors(), 0);
}

#[test]
fn status_sums_both_error_counters() {
    let upstream = Arc::new(RetainingAllocator::new());
    let allocator = SentryAllocator::with_upstream(upstream);
    allocator.set_quiet(true);

    // One bounds error.
    let ptr = allocator.allocate(8).unwrap();
    unsafe { ptr.add(8).write(0) };
    unsafe { allocator.deallocate(ptr) };

    // One identity error.
    let other = allocator.allocate(8).unwrap();
    unsafe {
        allocator.deallocate(other);
        allocator.deallocate(other);
    }

    assert_eq!(allocator.num_bounds_errors(), 1);
    assert_eq!(allocator.num_mismatches(), 1);
    assert_eq!(allocator.status(), 2);
}
