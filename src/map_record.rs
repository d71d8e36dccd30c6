// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    config::layout::PAGE_SIZE,
    error::{
        EmitError,
        OverflowDirection,
        Result,
    },
    mapping::Prot,
};

//==================================================================================================
// Constants
//==================================================================================================

///
/// # Description
///
/// Size in bytes of one serialized `map_record`.
///
/// The distilled spec's §3 describes `map_record` as "8 bytes" but then lists a 32-bit `addr`, a
/// 32-bit `offset`, and a third word holding a 20-bit size plus 8 reserved and 4 flag bits — 96
/// bits (12 bytes) of described fields, which cannot fit in 8 bytes without silently dropping one.
/// This is resolved (DESIGN.md) as three 32-bit little-endian words, 12 bytes total, preserving
/// every field the spec names rather than breaking the mapping-count and page-alignment
/// invariants (§8, properties 2 and 6) to force an 8-byte record.
///
pub const MAP_RECORD_SIZE: usize = 12;

const SIZE_MASK: u32 = (1 << 20) - 1;
const FLAG_R: u32 = 1 << 20;
const FLAG_W: u32 = 1 << 21;
const FLAG_X: u32 = 1 << 22;
const FLAG_ABS: u32 = 1 << 23;

//==================================================================================================
// Standalone Functions
//==================================================================================================

///
/// # Description
///
/// Implementation-defined predicate (§4.3, §6) separating absolute mappings from base-relative
/// ones: the top bit of the 64-bit address marks it absolute. Resolved as an Open Question in
/// DESIGN.md.
///
pub fn is_absolute(addr: u64) -> bool {
    (addr as i64) < 0
}

///
/// # Description
///
/// Clears the absolute-marker bit, yielding the real address an absolute mapping targets.
///
pub fn base_address(addr: u64) -> u64 {
    addr & (i64::MAX as u64)
}

///
/// # Description
///
/// Serializes one trampoline or refactor mapping range as a `map_record`, appending it to `dst`
/// (§4.3).
///
/// # Parameters
///
/// - `dst`: destination byte buffer; the record is appended.
/// - `addr`: virtual address (absolute or base-relative per [`is_absolute`]).
/// - `len`: length in bytes; must be page-aligned.
/// - `offset`: file offset in bytes; must be page-aligned.
/// - `prot`: protection bits to encode.
/// - `ub`: running maximum of non-absolute mapping bases, updated in place.
///
/// # Returns
///
/// The number of bytes written (always [`MAP_RECORD_SIZE`]) on success, or an [`EmitError`] if
/// any field does not fit its on-disk width.
///
pub fn emit_map(
    dst: &mut Vec<u8>,
    addr: u64,
    len: u64,
    offset: u64,
    prot: Prot,
    ub: &mut Option<u64>,
) -> Result<usize> {
    debug_assert_eq!(len % PAGE_SIZE, 0, "mapping length must be page-aligned");
    debug_assert_eq!(offset % PAGE_SIZE, 0, "mapping file offset must be page-aligned");

    let absolute = is_absolute(addr);
    let resolved_addr = if absolute { base_address(addr) } else { addr };
    debug_assert_eq!(resolved_addr % PAGE_SIZE, 0, "mapping address must be page-aligned");

    if !absolute {
        *ub = Some(ub.map_or(resolved_addr, |cur| cur.max(resolved_addr)));
    }

    let addr_pages = (resolved_addr / PAGE_SIZE) as i128;
    if addr_pages < i32::MIN as i128 {
        return Err(EmitError::OverflowError {
            field: "addr",
            value: addr_pages,
            direction: OverflowDirection::Under,
        });
    }
    if addr_pages > i32::MAX as i128 {
        return Err(EmitError::OverflowError {
            field: "addr",
            value: addr_pages,
            direction: OverflowDirection::Over,
        });
    }

    let size_pages = len / PAGE_SIZE;
    if size_pages > SIZE_MASK as u64 {
        return Err(EmitError::OverflowError {
            field: "size",
            value: size_pages as i128,
            direction: OverflowDirection::Over,
        });
    }

    let offset_pages = offset / PAGE_SIZE;
    if offset_pages > u32::MAX as u64 {
        return Err(EmitError::OverflowError {
            field: "offset",
            value: offset_pages as i128,
            direction: OverflowDirection::Over,
        });
    }

    let mut flags = size_pages as u32 & SIZE_MASK;
    if prot.r {
        flags |= FLAG_R;
    }
    if prot.w {
        flags |= FLAG_W;
    }
    if prot.x {
        flags |= FLAG_X;
    }
    if absolute {
        flags |= FLAG_ABS;
    }

    dst.extend_from_slice(&(addr_pages as i32).to_le_bytes());
    dst.extend_from_slice(&(offset_pages as u32).to_le_bytes());
    dst.extend_from_slice(&flags.to_le_bytes());

    Ok(MAP_RECORD_SIZE)
}
