/*!
 * Allocation and Deallocation
 * The sentry allocator's request and release paths
 */

use std::io::{self, Write as _};
use std::mem;
use std::process;
use std::ptr;
use std::sync::atomic::Ordering;

use log::warn;

use super::report;
use super::validate::validate_block;
use super::SentryAllocator;
use crate::alloc::header::BlockHeader;
use crate::alloc::traits::Allocator;
use crate::alloc::types::{AllocError, AllocResult};
use crate::core::limits::{
    align_up_to_max, is_max_aligned, ALLOCATED_MAGIC, DEALLOCATED_MAGIC, SCRIBBLE_BYTE,
    SENTINEL_BYTE, SENTINEL_SIZE,
};
use crate::core::types::Size;

impl SentryAllocator {
    /// Allocate `size` maximally aligned bytes from the upstream allocator,
    /// wrapped in a header and two sentinel regions. Zero-sized requests
    /// succeed with a null pointer and create no block.
    pub fn allocate(&self, size: Size) -> AllocResult<*mut u8> {
        // One lock spans the whole operation including the upstream call:
        // the upstream allocator is not assumed thread-safe, and the list
        // linkage plus the statistics group must change as a unit.
        let mut registry = self.registry.lock();

        // These three fields update before the request is attempted and are
        // not rolled back on failure. Test harnesses depend on exactly this,
        // so the ordering is contractual.
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.last_allocated_bytes.store(size, Ordering::Relaxed);
        self.last_allocated_address.store(0, Ordering::Relaxed);

        if self.allocation_limit.load(Ordering::Relaxed) >= 0 {
            // Countdown armed: every attempt consumes one unit, and the
            // attempt that drives it negative fails without touching memory.
            if self.allocation_limit.fetch_sub(1, Ordering::Relaxed) - 1 < 0 {
                return Err(AllocError::LimitReached { requested: size });
            }
        }

        if size == 0 {
            return Ok(ptr::null_mut());
        }

        let total = size
            .checked_add(mem::size_of::<BlockHeader>() + SENTINEL_SIZE)
            .and_then(align_up_to_max)
            .ok_or(AllocError::OutOfMemory { requested: size })?;
        // An upstream refusal of any kind surfaces as out-of-memory for the
        // size the client asked for; `LimitReached` always means this
        // instance's own countdown.
        let raw = self
            .upstream
            .allocate(total)
            .map_err(|_| AllocError::OutOfMemory { requested: size })?;

        // Maximal alignment of the upstream block is a trusted platform
        // invariant, not a recoverable condition.
        debug_assert!(
            is_max_aligned(raw as usize),
            "upstream allocator returned a misaligned block"
        );

        let header = raw.cast::<BlockHeader>();
        let id = self.allocations.load(Ordering::Relaxed) - 1;

        // SAFETY: `raw` is a fresh exclusive block of `total` bytes, aligned
        // and large enough for the header, `size` payload bytes, and the
        // trailing sentinel.
        unsafe {
            (*header).magic = ALLOCATED_MAGIC;
            (*header).size = size;
            (*header).id = id;
            (*header).owner = self.instance;
            registry.push_back(header);
        }

        self.blocks_in_use.fetch_add(1, Ordering::Relaxed);
        if self.num_blocks_max() < self.num_blocks_in_use() {
            self.blocks_max
                .store(self.num_blocks_in_use(), Ordering::Relaxed);
        }
        self.blocks_total.fetch_add(1, Ordering::Relaxed);

        self.bytes_in_use.fetch_add(size as u64, Ordering::Relaxed);
        if self.num_bytes_max() < self.num_bytes_in_use() {
            self.bytes_max
                .store(self.num_bytes_in_use(), Ordering::Relaxed);
        }
        self.bytes_total.fetch_add(size as u64, Ordering::Relaxed);

        let payload = BlockHeader::payload(header);
        self.last_allocated_address
            .store(payload as usize, Ordering::Relaxed);

        // Arm both guard regions. The user segment itself is left
        // uninitialized so uninitialized-read checkers stay effective.
        // SAFETY: both regions lie inside the block allocated above.
        unsafe {
            ptr::write_bytes(payload.sub(SENTINEL_SIZE), SENTINEL_BYTE, SENTINEL_SIZE);
            ptr::write_bytes(payload.add(size), SENTINEL_BYTE, SENTINEL_SIZE);
        }

        if self.is_verbose() {
            report::print_trace(self.name(), id, "Allocated", size, payload);
        }

        Ok(payload)
    }

    /// Validate and release a block obtained from [`allocate`](Self::allocate).
    ///
    /// Null is a legal no-op. A block that fails validation is counted as a
    /// mismatch or bounds error and is never returned upstream; unless the
    /// quiet flag is set, a diagnostic dump is printed and the process aborts
    /// (suppressed by the no-abort flag) so a debugger can inspect the
    /// faulting state.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer into memory this allocator can read a
    /// header and sentinels from. Passing a previously released pointer is a
    /// detected contract violation, but only reliably so while the upstream
    /// allocator has not reused or unmapped the block.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        let mut registry = self.registry.lock();

        self.last_deallocated_address
            .store(ptr as usize, Ordering::Relaxed);

        if ptr.is_null() {
            self.deallocations.fetch_add(1, Ordering::Relaxed);
            self.last_deallocated_bytes.store(0, Ordering::Relaxed);
            return;
        }

        let header = BlockHeader::from_payload(ptr);

        // SAFETY: validation dereferences nothing before proving the header
        // address is aligned, and no sentinel before the header validates.
        if let Some(fault) = unsafe { validate_block(header, self.instance) } {
            if fault.is_bounds() {
                self.bounds_errors.fetch_add(1, Ordering::Relaxed);
            } else {
                self.mismatches.fetch_add(1, Ordering::Relaxed);
            }
            warn!("block validation failed at {ptr:p}: {fault:?}");

            if self.is_quiet() {
                return;
            }

            let mut out = String::new();
            // SAFETY: same readability contract as the caller's.
            unsafe { report::write_fault_report(&mut out, header, fault) };
            print!("{out}");
            let _ = io::stdout().flush();

            if self.is_no_abort() {
                return;
            }
            process::abort();
        }

        // SAFETY: the block validated, so the header is live, owned by this
        // instance, and describes `size` payload bytes.
        let (size, id) = unsafe { ((*header).size, (*header).id) };

        self.deallocations.fetch_add(1, Ordering::Relaxed);
        self.last_deallocated_bytes.store(size, Ordering::Relaxed);
        self.blocks_in_use.fetch_sub(1, Ordering::Relaxed);
        self.bytes_in_use.fetch_sub(size as u64, Ordering::Relaxed);

        unsafe {
            (*header).magic = DEALLOCATED_MAGIC;
        }

        if self.is_verbose() {
            report::print_trace(self.name(), id, "Deallocated", size, ptr);
        }

        unsafe {
            registry.unlink(header);
            // Scribble the segment so stale reads through dangling pointers
            // are conspicuous. The block is handed upstream immediately
            // after, so the optimizer may elide this; best effort only.
            ptr::write_bytes(ptr, SCRIBBLE_BYTE, size);
            self.upstream.deallocate(header.cast());
        }
    }
}

impl Allocator for SentryAllocator {
    fn allocate(&self, size: Size) -> AllocResult<*mut u8> {
        SentryAllocator::allocate(self, size)
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        unsafe { SentryAllocator::deallocate(self, ptr) }
    }
}
