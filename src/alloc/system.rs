/*!
 * System Allocator
 * Upstream allocator over the C runtime heap
 */

use std::ffi::c_void;
use std::ptr;
use std::sync::{Arc, OnceLock};

use super::traits::Allocator;
use super::types::{AllocError, AllocResult};
use crate::core::types::Size;

/// Allocator over `malloc`/`free`.
///
/// `malloc` returns memory aligned for any fundamental type, which is the
/// alignment contract the rest of the crate builds on, and `free` takes no
/// size, matching the capability signature exactly. This allocator keeps no
/// state of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate(&self, size: Size) -> AllocResult<*mut u8> {
        if size == 0 {
            return Ok(ptr::null_mut());
        }
        // SAFETY: malloc has no preconditions for a positive size.
        let raw = unsafe { libc::malloc(size) };
        if raw.is_null() {
            return Err(AllocError::OutOfMemory { requested: size });
        }
        Ok(raw.cast())
    }

    unsafe fn deallocate(&self, ptr: *mut u8) {
        if !ptr.is_null() {
            // SAFETY: caller guarantees `ptr` came from `allocate` above.
            unsafe { libc::free(ptr.cast::<c_void>()) };
        }
    }
}

/// Process-wide default upstream allocator, created on first use.
///
/// Callers pass the returned handle explicitly; nothing in the crate consults
/// it as hidden global state.
pub fn system_allocator() -> Arc<SystemAllocator> {
    static DEFAULT: OnceLock<Arc<SystemAllocator>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(SystemAllocator)).clone()
}
