/*!
 * Allocation Guards
 * RAII wrappers for scoped allocations with automatic release
 */

use std::mem;

use super::traits::Allocator;
use super::types::AllocResult;
use crate::core::types::Size;

/// Scoped allocation released back to its allocator on drop.
///
/// ```
/// use memsentry::{AllocatorExt, SentryAllocator};
///
/// let allocator = SentryAllocator::new();
/// {
///     let block = allocator.allocate_guard(128).unwrap();
///     unsafe { block.ptr().write_bytes(0, block.size()) };
/// }
/// assert_eq!(allocator.num_blocks_in_use(), 0);
/// ```
pub struct AllocGuard<'a, A: Allocator + ?Sized> {
    ptr: *mut u8,
    size: Size,
    allocator: &'a A,
}

impl<'a, A: Allocator + ?Sized> AllocGuard<'a, A> {
    /// The guarded block. Null for a zero-sized allocation.
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Requested size of the block.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Release now instead of at end of scope.
    pub fn release_early(self) {
        drop(self);
    }

    /// Give up ownership without releasing; the caller becomes responsible
    /// for passing the pointer back to the same allocator.
    pub fn leak(self) -> *mut u8 {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl<'a, A: Allocator + ?Sized> Drop for AllocGuard<'a, A> {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `allocator.allocate` and ownership was
        // never given away (`leak` forgets the guard).
        unsafe { self.allocator.deallocate(self.ptr) };
    }
}

/// Extension methods available on every [`Allocator`].
pub trait AllocatorExt: Allocator {
    /// Allocate with an RAII guard for automatic release.
    fn allocate_guard(&self, size: Size) -> AllocResult<AllocGuard<'_, Self>> {
        let ptr = self.allocate(size)?;
        Ok(AllocGuard {
            ptr,
            size,
            allocator: self,
        })
    }
}

impl<A: Allocator + ?Sized> AllocatorExt for A {}
