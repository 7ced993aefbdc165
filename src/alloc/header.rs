/*!
 * Block Header
 * Guard metadata prefixed to every allocation, and the live-block list
 */

use std::mem;
use std::ptr;

use crate::core::limits::{MAX_ALIGNMENT, SENTINEL_SIZE};
use crate::core::types::{AllocationId, Size};

/// Metadata immediately preceding each user segment.
///
/// The layout is fixed (`repr(C)`) and arranged so `sentinel` runs exactly to
/// the end of the struct: the user segment starts at the first byte after the
/// header, which keeps the prefix guard directly adjacent to it.
#[repr(C, align(16))]
pub(crate) struct BlockHeader {
    /// Lifecycle tag; any value other than the two known magics means the
    /// header was clobbered or never belonged to a sentry allocator
    pub magic: u32,
    /// Previous live block owned by the same allocator
    pub prev: *mut BlockHeader,
    /// Next live block
    pub next: *mut BlockHeader,
    /// User-requested byte count, excluding header and sentinels
    pub size: Size,
    /// Allocation sequence number, never reused within an instance
    pub id: AllocationId,
    /// Identity tag of the owning allocator instance
    pub owner: u64,
    /// Prefix guard region, touching the user segment
    pub sentinel: [u8; SENTINEL_SIZE],
}

const _: () = {
    assert!(mem::size_of::<BlockHeader>() % MAX_ALIGNMENT == 0);
    assert!(mem::align_of::<BlockHeader>() == MAX_ALIGNMENT);
    // No tail padding: the prefix sentinel must touch the user segment.
    assert!(
        mem::offset_of!(BlockHeader, sentinel) + SENTINEL_SIZE == mem::size_of::<BlockHeader>()
    );
};

impl BlockHeader {
    /// User-segment address for `header`. Pure address arithmetic; the result
    /// is only dereferenceable if `header` is.
    pub fn payload(header: *mut BlockHeader) -> *mut u8 {
        header.cast::<u8>().wrapping_add(mem::size_of::<BlockHeader>())
    }

    /// Header address for a user-segment pointer. Pure address arithmetic;
    /// `ptr` may be arbitrary garbage and the result must be validated before
    /// any dereference.
    pub fn from_payload(ptr: *mut u8) -> *mut BlockHeader {
        ptr.wrapping_sub(mem::size_of::<BlockHeader>()).cast()
    }
}

/// Head and tail of the live-block list.
///
/// Contains exactly the set of blocks currently allocated and not yet
/// released; traversal order is allocation order. Only ever touched under the
/// owning allocator's mutex.
pub(crate) struct BlockList {
    head: *mut BlockHeader,
    tail: *mut BlockHeader,
}

// Raw pointers suppress the auto impl; the list is only reachable through the
// owning allocator's mutex.
unsafe impl Send for BlockList {}

impl BlockList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Append `header` at the tail.
    ///
    /// # Safety
    ///
    /// `header` must be a valid, exclusively owned header that is not linked
    /// into any list.
    pub unsafe fn push_back(&mut self, header: *mut BlockHeader) {
        unsafe {
            (*header).next = ptr::null_mut();
            if self.tail.is_null() {
                (*header).prev = ptr::null_mut();
                self.head = header;
            } else {
                (*header).prev = self.tail;
                (*self.tail).next = header;
            }
            self.tail = header;
        }
    }

    /// Unlink `header`, fixing up head, tail, and both neighbor links.
    ///
    /// # Safety
    ///
    /// `header` must currently be linked into this list.
    pub unsafe fn unlink(&mut self, header: *mut BlockHeader) {
        unsafe {
            let prev = (*header).prev;
            let next = (*header).next;
            if prev.is_null() {
                self.head = next;
            } else {
                (*prev).next = next;
            }
            if next.is_null() {
                self.tail = prev;
            } else {
                (*next).prev = prev;
            }
        }
    }

    /// Ids of all live blocks, in allocation order.
    ///
    /// # Safety
    ///
    /// Every linked header must still be valid.
    pub unsafe fn collect_ids(&self) -> Vec<AllocationId> {
        let mut ids = Vec::new();
        let mut cursor = self.head;
        while !cursor.is_null() {
            unsafe {
                ids.push((*cursor).id);
                cursor = (*cursor).next;
            }
        }
        ids
    }
}
