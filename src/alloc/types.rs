/*!
 * Allocation Types
 * Error taxonomy and the statistics snapshot
 */

use crate::core::types::{Address, Size};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allocation operation result
pub type AllocResult<T> = Result<T, AllocError>;

/// Allocation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The upstream allocator could not supply the block.
    #[error("out of memory: upstream allocator refused {requested} bytes")]
    OutOfMemory { requested: Size },

    /// The configured allocation-limit countdown was exhausted by this
    /// request. No memory was touched. Used by test harnesses to exercise
    /// client error paths on a deterministic Nth allocation.
    #[error("allocation limit exhausted: request for {requested} bytes denied")]
    LimitReached { requested: Size },
}

/// Point-in-time view of a sentry allocator's counters.
///
/// Assembled one atomic field at a time without taking the allocator lock, so
/// a snapshot taken while other threads allocate is not transactional: fields
/// may come from different instants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentryStats {
    /// Allocation attempts, successful or not
    pub allocations: u64,
    /// Completed deallocations, including null no-ops
    pub deallocations: u64,
    /// Identity errors detected at release (bad magic, double-free, wrong
    /// allocator, misaligned or corrupted header)
    pub mismatches: u64,
    /// Sentinel corruption detected at release (overrun or underrun)
    pub bounds_errors: u64,
    /// Blocks currently held by clients
    pub blocks_in_use: u64,
    /// Bytes currently held by clients (user segments only)
    pub bytes_in_use: u64,
    /// High-water mark of `blocks_in_use`
    pub blocks_max: u64,
    /// High-water mark of `bytes_in_use`
    pub bytes_max: u64,
    /// Blocks ever handed out
    pub blocks_total: u64,
    /// Bytes ever handed out
    pub bytes_total: u64,
    /// Size of the most recent allocation request, updated even when the
    /// request subsequently fails
    pub last_allocated_bytes: Size,
    /// Size of the most recently released block
    pub last_deallocated_bytes: Size,
    /// User-segment address of the most recent successful allocation; zero
    /// while a request is in flight or after a failed one
    pub last_allocated_address: Address,
    /// Address most recently passed to `deallocate`
    pub last_deallocated_address: Address,
}
