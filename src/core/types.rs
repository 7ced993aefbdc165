/*!
 * Core Types
 * Common types used across the crate
 */

/// Size type for allocation requests, in bytes
pub type Size = usize;

/// Address type for reporting allocated/deallocated locations
pub type Address = usize;

/// Allocation sequence number, unique and never reused within one allocator
pub type AllocationId = u64;
