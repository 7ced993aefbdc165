/*!
 * Diagnostic Reporting
 * Trace lines, hex dumps, the fault report, and the statistics table
 */

use std::fmt::Write as _;
use std::ptr;

use super::validate::BlockFault;
use crate::alloc::header::BlockHeader;
use crate::alloc::types::SentryStats;
use crate::core::limits::{PAYLOAD_DUMP_BYTES, SENTINEL_SIZE};
use crate::core::types::{AllocationId, Size};

/// One allocate/deallocate trace line, e.g.
/// `SentryAllocator global [25]: Allocated 128 bytes at 0x7f3a281a8.`
pub(crate) fn print_trace(
    name: Option<&str>,
    id: AllocationId,
    action: &str,
    size: Size,
    addr: *const u8,
) {
    let unit = if size == 1 { "byte" } else { "bytes" };
    match name {
        Some(name) => println!("SentryAllocator {name} [{id}]: {action} {size} {unit} at {addr:p}."),
        None => println!("SentryAllocator [{id}]: {action} {size} {unit} at {addr:p}."),
    }
}

/// Hex-dump `len` bytes starting at `addr`: sixteen bytes per line in four
/// groups of four, each line prefixed with the address of its first byte.
///
/// # Safety
///
/// `addr` must be readable for `len` bytes.
pub(crate) unsafe fn write_hex_block(out: &mut String, addr: *const u8, len: usize) {
    let mut offset = 0;
    while offset < len {
        if offset % 16 == 0 {
            if offset != 0 {
                out.push('\n');
            }
            let _ = write!(out, "{:p}:\t", addr.wrapping_add(offset));
        } else {
            out.push_str("  ");
        }
        let group_end = (offset + 4).min(len);
        while offset < group_end {
            let byte = unsafe { *addr.add(offset) };
            let _ = write!(out, "{byte:02x} ");
            offset += 1;
        }
    }
    out.push('\n');
}

/// Dump the header fields and the prefix sentinel. All fields are read
/// unaligned: this runs on headers that failed validation, including
/// misaligned ones.
///
/// # Safety
///
/// The header's span of memory must be readable.
unsafe fn write_header_dump(out: &mut String, header: *const BlockHeader) {
    let magic = unsafe { ptr::addr_of!((*header).magic).read_unaligned() };
    let id = unsafe { ptr::addr_of!((*header).id).read_unaligned() };
    let owner = unsafe { ptr::addr_of!((*header).owner).read_unaligned() };
    let size = unsafe { ptr::addr_of!((*header).size).read_unaligned() };
    let payload = BlockHeader::payload(header.cast_mut());

    let _ = writeln!(out, "  Magic num: 0x{magic:x}, Id: {id}, Owner tag: {owner}");
    let _ = writeln!(out, "  User segment addr: {payload:p}, num bytes: {size}");
    out.push_str("  Prefix sentinel:\n    ");
    unsafe {
        write_hex_block(out, payload.cast_const().wrapping_sub(SENTINEL_SIZE), SENTINEL_SIZE);
    }
}

/// Render the full diagnostic for a block that failed validation: the error
/// line, the corrupted pad region for bounds faults, the header fields, and
/// a prefix of the user payload. The payload dump length is clamped to the
/// block for bounds faults (the stored size is trustworthy there) and fixed
/// for identity faults (it is not).
///
/// # Safety
///
/// The header and the region it describes must be readable, as for
/// [`write_hex_block`].
pub(crate) unsafe fn write_fault_report(
    out: &mut String,
    header: *const BlockHeader,
    fault: BlockFault,
) {
    let payload = BlockHeader::payload(header.cast_mut()).cast_const();
    let size = unsafe { ptr::addr_of!((*header).size).read_unaligned() };

    let mut payload_dump = PAYLOAD_DUMP_BYTES;
    match fault {
        BlockFault::DoubleFree => {
            let _ = writeln!(
                out,
                "*** Deallocating previously deallocated memory at {payload:p}. ***"
            );
        }
        BlockFault::Misaligned | BlockFault::BadMagic { .. } => {
            let magic = unsafe { ptr::addr_of!((*header).magic).read_unaligned() };
            let _ = writeln!(
                out,
                "*** Invalid magic number 0x{magic:08x} at address {payload:p}. ***"
            );
        }
        BlockFault::CorruptSize => {
            let _ = writeln!(
                out,
                "*** Invalid (non-positive) byte count {size} at address {payload:p}. ***"
            );
        }
        BlockFault::WrongAllocator => {
            let _ = writeln!(
                out,
                "*** Freeing segment at {payload:p} from wrong allocator. ***"
            );
        }
        BlockFault::Underrun { bytes } => {
            let _ = writeln!(
                out,
                "*** Memory corrupted at {bytes} bytes before {size} byte segment at {payload:p}. ***"
            );
            out.push_str("Pad area before user segment:\n");
            unsafe { write_hex_block(out, payload.wrapping_sub(SENTINEL_SIZE), SENTINEL_SIZE) };
            payload_dump = payload_dump.min(size + SENTINEL_SIZE);
        }
        BlockFault::Overrun { bytes } => {
            let _ = writeln!(
                out,
                "*** Memory corrupted at {bytes} bytes after {size} byte segment at {payload:p}. ***"
            );
            out.push_str("Pad area after user segment:\n");
            unsafe { write_hex_block(out, payload.wrapping_add(size), SENTINEL_SIZE) };
            payload_dump = payload_dump.min(size + SENTINEL_SIZE);
        }
    }

    out.push_str("Header:\n");
    unsafe { write_header_dump(out, header) };
    out.push_str("User segment:\n");
    unsafe { write_hex_block(out, payload, payload_dump) };
}

/// Render the statistics table.
pub(crate) fn write_stats_table(out: &mut String, name: Option<&str>, stats: &SentryStats) {
    out.push('\n');
    out.push_str("==================================================\n");
    match name {
        Some(name) => {
            let _ = writeln!(out, "            SENTRY ALLOCATOR {name} STATE");
        }
        None => out.push_str("              SENTRY ALLOCATOR STATE\n"),
    }
    out.push_str("--------------------------------------------------\n");
    let _ = writeln!(
        out,
        "        Category\tBlocks\tBytes\n\
         {:8}--------\t------\t-----\n\
         {:10}IN USE\t{}\t{}\n\
         {:13}MAX\t{}\t{}\n\
         {:11}TOTAL\t{}\t{}\n\
         {:6}MISMATCHES\t{}\n\
         {:3}BOUNDS ERRORS\t{}",
        "",
        "",
        stats.blocks_in_use,
        stats.bytes_in_use,
        "",
        stats.blocks_max,
        stats.bytes_max,
        "",
        stats.blocks_total,
        stats.bytes_total,
        "",
        stats.mismatches,
        "",
        stats.bounds_errors,
    );
    out.push_str("--------------------------------------------------\n");
}

/// Render the ids of outstanding blocks, eight per line, in allocation order.
pub(crate) fn write_block_ids(out: &mut String, ids: &[AllocationId]) {
    out.push_str(" Indices of outstanding memory allocations:\n");
    for chunk in ids.chunks(8) {
        for id in chunk {
            let _ = write!(out, "\t{id}");
        }
        out.push('\n');
    }
}
