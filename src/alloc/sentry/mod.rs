/*!
 * Sentry Allocator
 *
 * The instrumented diagnostic allocator: wraps an upstream allocator,
 * registers every live block in a linked list, tracks cumulative statistics,
 * injects allocation failures on a configurable countdown, and validates
 * every block at release time.
 */

mod allocator;
mod report;
mod validate;

use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::header::BlockList;
use super::system::system_allocator;
use super::traits::Allocator;
use super::types::SentryStats;
use crate::core::types::{Address, Size};

/// Source of per-instance identity tags. Starts at 1 so a zeroed header never
/// matches a live instance.
static NEXT_INSTANCE_TAG: AtomicU64 = AtomicU64::new(1);

/// Instrumented diagnostic allocator.
///
/// Implements [`Allocator`] and consumes one, so it can stand in anywhere an
/// allocator is expected, including as the upstream of another sentry.
///
/// All mutating operations are serialized by one internal mutex, held across
/// the upstream call as well: the upstream allocator is not assumed
/// thread-safe, and the list linkage plus multi-field statistics updates must
/// appear atomic to other mutators. The statistics themselves are relaxed
/// atomics written only under that lock, so the read accessors never block;
/// each accessor is individually consistent but a group of reads is not a
/// transactional snapshot.
pub struct SentryAllocator {
    name: Option<String>,
    /// Identity tag stamped into every block this instance produces
    instance: u64,
    upstream: Arc<dyn Allocator>,

    verbose: AtomicBool,
    quiet: AtomicBool,
    no_abort: AtomicBool,
    /// Fault-injection countdown; negative means unlimited
    allocation_limit: AtomicI64,

    allocations: AtomicU64,
    deallocations: AtomicU64,
    mismatches: AtomicU64,
    bounds_errors: AtomicU64,
    blocks_in_use: AtomicU64,
    bytes_in_use: AtomicU64,
    blocks_max: AtomicU64,
    bytes_max: AtomicU64,
    blocks_total: AtomicU64,
    bytes_total: AtomicU64,
    last_allocated_bytes: AtomicUsize,
    last_deallocated_bytes: AtomicUsize,
    last_allocated_address: AtomicUsize,
    last_deallocated_address: AtomicUsize,

    registry: Mutex<BlockList>,
}

impl SentryAllocator {
    /// `status` value reported when no errors occurred but blocks or bytes
    /// were still in use.
    pub const MEMORY_LEAK: i64 = -1;

    /// Create an unnamed allocator over the process-wide system upstream.
    pub fn new() -> Self {
        Self::build(None, system_allocator())
    }

    /// Create a named allocator over the process-wide system upstream. The
    /// name appears in trace lines and reports.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()), system_allocator())
    }

    /// Create an unnamed allocator over an explicit upstream.
    pub fn with_upstream(upstream: Arc<dyn Allocator>) -> Self {
        Self::build(None, upstream)
    }

    /// Create a named allocator over an explicit upstream.
    pub fn with_name_and_upstream(name: impl Into<String>, upstream: Arc<dyn Allocator>) -> Self {
        Self::build(Some(name.into()), upstream)
    }

    fn build(name: Option<String>, upstream: Arc<dyn Allocator>) -> Self {
        let instance = NEXT_INSTANCE_TAG.fetch_add(1, Ordering::Relaxed);
        debug!(
            "sentry allocator {} created (instance tag {})",
            name.as_deref().unwrap_or("<unnamed>"),
            instance
        );
        Self {
            name,
            instance,
            upstream,
            verbose: AtomicBool::new(false),
            quiet: AtomicBool::new(false),
            no_abort: AtomicBool::new(false),
            allocation_limit: AtomicI64::new(-1),
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            mismatches: AtomicU64::new(0),
            bounds_errors: AtomicU64::new(0),
            blocks_in_use: AtomicU64::new(0),
            bytes_in_use: AtomicU64::new(0),
            blocks_max: AtomicU64::new(0),
            bytes_max: AtomicU64::new(0),
            blocks_total: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            last_allocated_bytes: AtomicUsize::new(0),
            last_deallocated_bytes: AtomicUsize::new(0),
            last_allocated_address: AtomicUsize::new(0),
            last_deallocated_address: AtomicUsize::new(0),
            registry: Mutex::new(BlockList::new()),
        }
    }

    /// Display name, if one was given at construction.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Trace every allocation and deallocation to stdout and print the full
    /// report at drop.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Suppress all error reporting and never abort. Errors are still
    /// counted, which is how test harnesses observe them.
    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
    }

    /// Report errors but never terminate the process.
    pub fn set_no_abort(&self, no_abort: bool) {
        self.no_abort.store(no_abort, Ordering::Relaxed);
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Relaxed)
    }

    pub fn is_no_abort(&self) -> bool {
        self.no_abort.load(Ordering::Relaxed)
    }

    /// Arm or disarm the fault-injection countdown. A non-negative `limit`
    /// allows that many further allocation attempts before one fails with
    /// [`AllocError::LimitReached`](super::types::AllocError::LimitReached);
    /// a negative value disarms the countdown.
    ///
    /// Each attempt consumes one unit, including zero-sized requests. The
    /// countdown is meant for single-threaded test code; under concurrent
    /// allocation the attempt that trips it is unspecified.
    pub fn set_allocation_limit(&self, limit: i64) {
        self.allocation_limit.store(limit, Ordering::Relaxed);
    }

    /// Remaining fault-injection countdown, negative when disarmed.
    pub fn allocation_limit(&self) -> i64 {
        self.allocation_limit.load(Ordering::Relaxed)
    }

    // Lock-free statistics accessors. Each reads a single atomic; see the
    // type-level note about snapshot consistency.

    /// Allocation attempts, successful or not.
    pub fn num_allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Completed deallocations, including null no-ops.
    pub fn num_deallocations(&self) -> u64 {
        self.deallocations.load(Ordering::Relaxed)
    }

    /// Identity errors detected at release time.
    pub fn num_mismatches(&self) -> u64 {
        self.mismatches.load(Ordering::Relaxed)
    }

    /// Sentinel corruption detected at release time.
    pub fn num_bounds_errors(&self) -> u64 {
        self.bounds_errors.load(Ordering::Relaxed)
    }

    pub fn num_blocks_in_use(&self) -> u64 {
        self.blocks_in_use.load(Ordering::Relaxed)
    }

    pub fn num_bytes_in_use(&self) -> u64 {
        self.bytes_in_use.load(Ordering::Relaxed)
    }

    pub fn num_blocks_max(&self) -> u64 {
        self.blocks_max.load(Ordering::Relaxed)
    }

    pub fn num_bytes_max(&self) -> u64 {
        self.bytes_max.load(Ordering::Relaxed)
    }

    pub fn num_blocks_total(&self) -> u64 {
        self.blocks_total.load(Ordering::Relaxed)
    }

    pub fn num_bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }

    /// Size of the most recent allocation request. Updated before the
    /// request is attempted, so it reflects failed requests too.
    pub fn last_allocated_bytes(&self) -> Size {
        self.last_allocated_bytes.load(Ordering::Relaxed)
    }

    pub fn last_deallocated_bytes(&self) -> Size {
        self.last_deallocated_bytes.load(Ordering::Relaxed)
    }

    /// User-segment address of the most recent successful allocation; reset
    /// to zero at the start of every request.
    pub fn last_allocated_address(&self) -> Address {
        self.last_allocated_address.load(Ordering::Relaxed)
    }

    /// Address most recently passed to `deallocate`, recorded before any
    /// validation.
    pub fn last_deallocated_address(&self) -> Address {
        self.last_deallocated_address.load(Ordering::Relaxed)
    }

    /// Field-by-field statistics snapshot; not transactional.
    pub fn stats(&self) -> SentryStats {
        SentryStats {
            allocations: self.num_allocations(),
            deallocations: self.num_deallocations(),
            mismatches: self.num_mismatches(),
            bounds_errors: self.num_bounds_errors(),
            blocks_in_use: self.num_blocks_in_use(),
            bytes_in_use: self.num_bytes_in_use(),
            blocks_max: self.num_blocks_max(),
            bytes_max: self.num_bytes_max(),
            blocks_total: self.num_blocks_total(),
            bytes_total: self.num_bytes_total(),
            last_allocated_bytes: self.last_allocated_bytes(),
            last_deallocated_bytes: self.last_deallocated_bytes(),
            last_allocated_address: self.last_allocated_address(),
            last_deallocated_address: self.last_deallocated_address(),
        }
    }

    /// Health summary: `0` when error-free with nothing outstanding, the sum
    /// of mismatch and bounds-error counts when positive, or
    /// [`MEMORY_LEAK`](Self::MEMORY_LEAK) when error-free but blocks or bytes
    /// remain in use. Takes the lock so the error counters and in-use figures
    /// come from one instant.
    pub fn status(&self) -> i64 {
        let _registry = self.registry.lock();
        let errors = self.num_mismatches() + self.num_bounds_errors();
        if errors > 0 {
            errors as i64
        } else if self.num_blocks_in_use() != 0 || self.num_bytes_in_use() != 0 {
            Self::MEMORY_LEAK
        } else {
            0
        }
    }

    /// Render the statistics table and, when blocks are outstanding, their
    /// allocation ids in allocation order.
    pub fn write_report(&self, out: &mut String) {
        let registry = self.registry.lock();
        report::write_stats_table(out, self.name(), &self.stats());
        // SAFETY: every header in the list is live while the lock is held.
        let ids = unsafe { registry.collect_ids() };
        if !ids.is_empty() {
            report::write_block_ids(out, &ids);
        }
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        let mut out = String::new();
        self.write_report(&mut out);
        print!("{out}");
        let _ = io::stdout().flush();
    }
}

impl Default for SentryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SentryAllocator {
    fn drop(&mut self) {
        if self.is_verbose() {
            self.print();
        }

        // Outstanding blocks are deliberately not released here. A non-empty
        // list may stem from corrupted memory, and freeing a corrupted block
        // could destroy the evidence or crash past the fault site; the memory
        // is abandoned to process termination instead.

        if self.is_quiet() {
            return;
        }

        let blocks = self.num_blocks_in_use();
        let bytes = self.num_bytes_in_use();
        debug_assert_eq!(self.registry.get_mut().is_empty(), blocks == 0);
        if blocks != 0 || bytes != 0 {
            let mut out = String::new();
            out.push_str("MEMORY_LEAK");
            if let Some(name) = self.name() {
                let _ = write!(out, " from {name}");
            }
            let _ = writeln!(
                out,
                ":\n  Number of blocks in use = {blocks}\n   Number of bytes in use = {bytes}"
            );
            print!("{out}");
            let _ = io::stdout().flush();

            if !self.is_no_abort() {
                std::process::abort();
            }
        }
    }
}
