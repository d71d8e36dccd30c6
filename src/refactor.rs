// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    binary::Binary,
    config::layout::PAGE_SIZE,
    error::{
        EmitError,
        Result,
    },
};

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// A planned restoration of original pages (§3, §4.2). `patched_offset` starts unset and is filled
/// in by [`apply`] once the relocated copy's new file position is known.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refactor {
    pub addr: u64,
    pub size: u64,
    pub original_offset: u64,
    pub patched_offset: Option<u64>,
}

//==================================================================================================
// Standalone Functions
//==================================================================================================

///
/// # Description
///
/// Clusters the pages of `binary.patched_bytes` that differ from `binary.original_bytes` into a
/// list of [`Refactor`] entries, bounded by `mapping_size` (§4.2 steps 1-3).
///
/// # Parameters
///
/// - `binary`: the in-progress patch target; only `patched_bytes`, `original_bytes`, and
///   `instructions` are read.
/// - `mapping_size`: maximum gap, in bytes, tolerated between a cluster's current end and the next
///   dirty page before a new cluster is started.
///
/// # Returns
///
/// The ordered list of refactor clusters (possibly empty), or [`EmitError::InternalError`] if a
/// dirty page has no covering instruction (§9, Open Question a).
///
pub fn plan(binary: &Binary, mapping_size: u64) -> Result<Vec<Refactor>> {
    let total_len = binary.patched_bytes.len() as u64;
    debug_assert_eq!(total_len % PAGE_SIZE, 0, "patched_bytes must be page-aligned on entry");

    let mut refactors = Vec::new();
    let mut cluster: Option<Refactor> = None;

    let mut offset = 0u64;
    while offset < total_len {
        let page = offset as usize..(offset + PAGE_SIZE) as usize;
        let original_page = binary.original_bytes.get(page.clone());
        let patched_page = &binary.patched_bytes[page];
        let dirty = match original_page {
            Some(orig) => orig != patched_page,
            None => patched_page.iter().any(|&b| b != 0),
        };

        if dirty {
            let instr = binary
                .instructions
                .lower_bound(offset)
                .ok_or(EmitError::InternalError { offset })?;

            let page_addr = crate::bytes::round_down(instr.vaddr, PAGE_SIZE);
            let page_offset = crate::bytes::round_down(instr.file_offset, PAGE_SIZE);
            debug_assert_eq!(page_offset, offset, "instruction index out of sync with dirty page");

            match cluster {
                Some(ref mut curr) if page_addr >= curr.addr && page_addr <= curr.addr + curr.size + mapping_size => {
                    curr.size = page_addr + PAGE_SIZE - curr.addr;
                },
                _ => {
                    if let Some(finished) = cluster.take() {
                        refactors.push(finished);
                    }
                    cluster = Some(Refactor {
                        addr: page_addr,
                        size: PAGE_SIZE,
                        original_offset: offset,
                        patched_offset: None,
                    });
                },
            }
        }

        offset += PAGE_SIZE;
    }

    if let Some(finished) = cluster.take() {
        refactors.push(finished);
    }

    Ok(refactors)
}

///
/// # Description
///
/// Applies a refactor plan (§4.2 step 4): for each refactor in order, appends its current patched
/// bytes at the file's new logical end, then overwrites the `original_offset` range back to the
/// original bytes, filling in each refactor's `patched_offset`.
///
/// # Returns
///
/// The total number of bytes appended to `binary.patched_bytes`.
///
pub fn apply(binary: &mut Binary, refactors: &mut [Refactor]) -> u64 {
    let mut grown = 0u64;
    for refactor in refactors.iter_mut() {
        let start = refactor.original_offset as usize;
        let end = start + refactor.size as usize;

        let patched_offset = binary.patched_bytes.len() as u64;
        let relocated = binary.patched_bytes[start..end].to_vec();
        binary.patched_bytes.extend_from_slice(&relocated);

        binary.patched_bytes[start..end].copy_from_slice(&binary.original_bytes[start..end]);

        refactor.patched_offset = Some(patched_offset);
        grown += refactor.size;
    }
    grown
}
