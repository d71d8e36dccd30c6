// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    bytes::{
        write_u32,
        write_u64,
    },
    error::{
        EmitError,
        Result,
    },
};

//==================================================================================================
// Constants
//==================================================================================================

/// `magic[8]` value every `config_record` starts with (§3).
pub const MAGIC: [u8; 8] = *b"E9PATCH\0";

/// Bit 0 of `config_record.flags`: set when the rewired entry point is `e_entry` (executable
/// mode) rather than a `DT_INIT` entry (DSO mode).
pub const EXECUTABLE_FLAG: u32 = 1 << 0;

// Field offsets, relative to the start of the config region (`config_offset`).
const OFF_MAGIC: usize = 0;
const OFF_FLAGS: usize = 8;
const OFF_SIZE: usize = 12;
const OFF_BASE: usize = 16;
const OFF_ENTRY: usize = 24;
const OFF_DYNAMIC: usize = 32;
const OFF_MMAP: usize = 40;
const OFF_NUM_MAPS: usize = 48; // two u32, indices 0 (preload) and 1 (postload)
const OFF_MAPS: usize = 56; // two u64
const OFF_NUM_INITS: usize = 72;
const OFF_INITS: usize = 80;

///
/// # Description
///
/// Size in bytes of the `config_record` proper, not counting the mode-specific extension that
/// immediately follows it (§3, §4.4 Step E).
///
pub const CONFIG_RECORD_SIZE: usize = 88;

// The ELF-specific extension (`config_elf`) holds one field: a copy of `dynamic` the loader shim
// reads without needing to know the base `config_record` layout. The distilled spec names no other
// member for it ("at minimum containing `dynamic`"); DESIGN.md records this as the resolved shape.
const OFF_ELF_DYNAMIC: usize = 0;

///
/// # Description
///
/// Size in bytes of the mode-specific `config_elf` extension (§4.4 Step E).
///
pub const CONFIG_ELF_EXT_SIZE: usize = 8;

//==================================================================================================
// Standalone Functions
//==================================================================================================

///
/// # Description
///
/// Appends a zero-filled `config_record` plus its `config_elf` extension to `dst`, then fills in
/// `magic` and `base` (the two fields known at the time the region is opened).
///
/// # Returns
///
/// The offset within `dst` (before this call) at which the config region starts.
///
pub fn write_placeholder(dst: &mut Vec<u8>, base: u64) -> Result<usize> {
    let config_offset = dst.len();
    dst.resize(dst.len() + CONFIG_RECORD_SIZE + CONFIG_ELF_EXT_SIZE, 0);
    set_field(dst, config_offset, OFF_MAGIC, &MAGIC)?;
    set_base(dst, config_offset, base)?;
    Ok(config_offset)
}

fn set_field(dst: &mut [u8], config_offset: usize, rel: usize, bytes: &[u8]) -> Result<()> {
    let start = config_offset + rel;
    let end = start + bytes.len();
    dst.get_mut(start..end)
        .ok_or(EmitError::InternalError { offset: start as u64 })?
        .copy_from_slice(bytes);
    Ok(())
}

fn set_u32(dst: &mut [u8], config_offset: usize, rel: usize, value: u32) -> Result<()> {
    if write_u32(dst, config_offset + rel, value) {
        Ok(())
    } else {
        Err(EmitError::InternalError { offset: (config_offset + rel) as u64 })
    }
}

fn set_u64(dst: &mut [u8], config_offset: usize, rel: usize, value: u64) -> Result<()> {
    if write_u64(dst, config_offset + rel, value) {
        Ok(())
    } else {
        Err(EmitError::InternalError { offset: (config_offset + rel) as u64 })
    }
}

pub fn set_flags(dst: &mut [u8], config_offset: usize, flags: u32) -> Result<()> {
    set_u32(dst, config_offset, OFF_FLAGS, flags)
}

pub fn set_size(dst: &mut [u8], config_offset: usize, size: u32) -> Result<()> {
    set_u32(dst, config_offset, OFF_SIZE, size)
}

fn set_base(dst: &mut [u8], config_offset: usize, base: u64) -> Result<()> {
    set_u64(dst, config_offset, OFF_BASE, base)
}

pub fn set_entry(dst: &mut [u8], config_offset: usize, entry: u64) -> Result<()> {
    set_u64(dst, config_offset, OFF_ENTRY, entry)
}

///
/// # Description
///
/// Writes `dynamic` into both the `config_record` field and the `config_elf` extension's copy
/// (§4.4 Step L).
///
pub fn set_dynamic(dst: &mut [u8], config_offset: usize, dynamic: u64) -> Result<()> {
    set_u64(dst, config_offset, OFF_DYNAMIC, dynamic)?;
    set_u64(dst, config_offset + CONFIG_RECORD_SIZE, OFF_ELF_DYNAMIC, dynamic)
}

pub fn set_mmap(dst: &mut [u8], config_offset: usize, mmap: u64) -> Result<()> {
    set_u64(dst, config_offset, OFF_MMAP, mmap)
}

///
/// # Description
///
/// `index` 0 selects the preload array, 1 the postload array (§3, §4.4 Step G).
///
pub fn set_num_maps(dst: &mut [u8], config_offset: usize, index: usize, count: u32) -> Result<()> {
    set_u32(dst, config_offset, OFF_NUM_MAPS + index * 4, count)
}

pub fn set_maps_offset(dst: &mut [u8], config_offset: usize, index: usize, rel_offset: u64) -> Result<()> {
    set_u64(dst, config_offset, OFF_MAPS + index * 8, rel_offset)
}

pub fn set_num_inits(dst: &mut [u8], config_offset: usize, count: u32) -> Result<()> {
    set_u32(dst, config_offset, OFF_NUM_INITS, count)
}

pub fn set_inits_offset(dst: &mut [u8], config_offset: usize, rel_offset: u64) -> Result<()> {
    set_u64(dst, config_offset, OFF_INITS, rel_offset)
}
