// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    bytes::{
        read_u16,
        read_u32,
        read_u64,
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

/// Number of identification bytes at the start of `e_ident`.
pub const EI_NIDENT: usize = 16;
/// Size in bytes of an `Elf64_Ehdr`.
pub const EHDR64_SIZE: usize = 64;
/// Size in bytes of a single `Elf64_Phdr` entry.
pub const PHDR64_SIZE: usize = 56;
/// Size in bytes of a single `Elf64_Dyn` entry.
pub const DYN64_SIZE: usize = 16;

// ELF magic numbers (`e_ident[EI_MAG0..EI_MAG3]`).
pub const ELFMAG0: u8 = 0x7f;
pub const ELFMAG1: u8 = b'E';
pub const ELFMAG2: u8 = b'L';
pub const ELFMAG3: u8 = b'F';

// `e_ident` indices.
pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const EI_VERSION: usize = 6;

// File classes (`e_ident[EI_CLASS]`).
pub const ELFCLASS64: u8 = 2;

// Data encodings (`e_ident[EI_DATA]`).
pub const ELFDATA2LSB: u8 = 1;

// Object file versions.
pub const EV_CURRENT: u32 = 1;

// Object file types (`e_type`).
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

// Required machine architecture (`e_machine`).
pub const EM_X86_64: u16 = 62;

/// Normal upper limit on `e_phnum`; `PN_XNUM` (0xffff) signals "see section header 0" instead,
/// which this core does not support (§4.1).
pub const PN_XNUM: u16 = 0xffff;

// Segment types (`p_type`).
pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_NOTE: u32 = 4;
pub const PT_GNU_STACK: u32 = 0x6474_e551;
pub const PT_GNU_RELRO: u32 = 0x6474_e552;

// Segment flags (`p_flags`).
pub const PF_X: u32 = 1 << 0;
pub const PF_W: u32 = 1 << 1;
pub const PF_R: u32 = 1 << 2;

// Dynamic tags (`d_tag`).
pub const DT_NULL: u64 = 0;
pub const DT_INIT: u64 = 12;

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// A bounds-checked view of an `Elf64_Ehdr` living at `offset` within some byte buffer. Unlike the
/// teacher's `Elf32Fhdr::from_address`, which casts a raw pointer and dereferences it directly,
/// this view stores only an offset and re-validates bounds on every field access (Design Notes §9
/// "owning-buffer with pointers into it" — offsets, not pointers, survive buffer reallocation).
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ehdr64View {
    pub offset: usize,
}

impl Ehdr64View {
    pub fn new(offset: usize) -> Self {
        Self { offset }
    }

    fn field_u16(&self, buf: &[u8], rel: usize) -> Result<u16> {
        read_u16(buf, self.offset + rel).ok_or(EmitError::MalformedInput {
            reason: "truncated ELF header",
            offset: self.offset as u64,
        })
    }

    fn field_u32(&self, buf: &[u8], rel: usize) -> Result<u32> {
        read_u32(buf, self.offset + rel).ok_or(EmitError::MalformedInput {
            reason: "truncated ELF header",
            offset: self.offset as u64,
        })
    }

    fn field_u64(&self, buf: &[u8], rel: usize) -> Result<u64> {
        read_u64(buf, self.offset + rel).ok_or(EmitError::MalformedInput {
            reason: "truncated ELF header",
            offset: self.offset as u64,
        })
    }

    pub fn ident_byte(&self, buf: &[u8], index: usize) -> Result<u8> {
        buf.get(self.offset + index)
            .copied()
            .ok_or(EmitError::MalformedInput {
                reason: "truncated e_ident",
                offset: self.offset as u64,
            })
    }

    pub fn e_type(&self, buf: &[u8]) -> Result<u16> {
        self.field_u16(buf, 16)
    }

    pub fn e_machine(&self, buf: &[u8]) -> Result<u16> {
        self.field_u16(buf, 18)
    }

    pub fn e_version(&self, buf: &[u8]) -> Result<u32> {
        self.field_u32(buf, 20)
    }

    pub fn e_entry(&self, buf: &[u8]) -> Result<u64> {
        self.field_u64(buf, 24)
    }

    pub fn e_phoff(&self, buf: &[u8]) -> Result<u64> {
        self.field_u64(buf, 32)
    }

    pub fn e_shoff(&self, buf: &[u8]) -> Result<u64> {
        self.field_u64(buf, 40)
    }

    pub fn e_phentsize(&self, buf: &[u8]) -> Result<u16> {
        self.field_u16(buf, 54)
    }

    pub fn e_phnum(&self, buf: &[u8]) -> Result<u16> {
        self.field_u16(buf, 56)
    }

    pub fn set_e_entry(&self, buf: &mut [u8], value: u64) -> Result<()> {
        if write_u64(buf, self.offset + 24, value) {
            Ok(())
        } else {
            Err(EmitError::InternalError {
                offset: self.offset as u64,
            })
        }
    }
}

///
/// # Description
///
/// A bounds-checked view of an `Elf64_Phdr` living at `offset`. See [`Ehdr64View`] for the
/// offset-not-pointer rationale.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phdr64View {
    pub offset: usize,
}

impl Phdr64View {
    pub fn new(offset: usize) -> Self {
        Self { offset }
    }

    fn field_u32(&self, buf: &[u8], rel: usize) -> Result<u32> {
        read_u32(buf, self.offset + rel).ok_or(EmitError::MalformedInput {
            reason: "truncated program header",
            offset: self.offset as u64,
        })
    }

    fn field_u64(&self, buf: &[u8], rel: usize) -> Result<u64> {
        read_u64(buf, self.offset + rel).ok_or(EmitError::MalformedInput {
            reason: "truncated program header",
            offset: self.offset as u64,
        })
    }

    pub fn p_type(&self, buf: &[u8]) -> Result<u32> {
        self.field_u32(buf, 0)
    }

    pub fn p_flags(&self, buf: &[u8]) -> Result<u32> {
        self.field_u32(buf, 4)
    }

    pub fn p_offset(&self, buf: &[u8]) -> Result<u64> {
        self.field_u64(buf, 8)
    }

    pub fn p_vaddr(&self, buf: &[u8]) -> Result<u64> {
        self.field_u64(buf, 16)
    }

    pub fn p_filesz(&self, buf: &[u8]) -> Result<u64> {
        self.field_u64(buf, 32)
    }

    pub fn p_memsz(&self, buf: &[u8]) -> Result<u64> {
        self.field_u64(buf, 40)
    }

    pub fn set_p_type(&self, buf: &mut [u8], value: u32) -> bool {
        write_u32(buf, self.offset, value)
    }

    pub fn set_p_flags(&self, buf: &mut [u8], value: u32) -> bool {
        write_u32(buf, self.offset + 4, value)
    }

    pub fn set_p_offset(&self, buf: &mut [u8], value: u64) -> bool {
        write_u64(buf, self.offset + 8, value)
    }

    pub fn set_p_vaddr(&self, buf: &mut [u8], value: u64) -> bool {
        write_u64(buf, self.offset + 16, value)
    }

    pub fn set_p_paddr(&self, buf: &mut [u8], value: u64) -> bool {
        write_u64(buf, self.offset + 24, value)
    }

    pub fn set_p_filesz(&self, buf: &mut [u8], value: u64) -> bool {
        write_u64(buf, self.offset + 32, value)
    }

    pub fn set_p_memsz(&self, buf: &mut [u8], value: u64) -> bool {
        write_u64(buf, self.offset + 40, value)
    }

    pub fn set_p_align(&self, buf: &mut [u8], value: u64) -> bool {
        write_u64(buf, self.offset + 48, value)
    }
}

///
/// # Description
///
/// A bounds-checked view of one `Elf64_Dyn` entry living at `offset`.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynView {
    pub offset: usize,
}

impl DynView {
    pub fn new(offset: usize) -> Self {
        Self { offset }
    }

    pub fn d_tag(&self, buf: &[u8]) -> Result<u64> {
        read_u64(buf, self.offset).ok_or(EmitError::MalformedInput {
            reason: "truncated dynamic entry",
            offset: self.offset as u64,
        })
    }

    pub fn d_val(&self, buf: &[u8]) -> Result<u64> {
        read_u64(buf, self.offset + 8).ok_or(EmitError::MalformedInput {
            reason: "truncated dynamic entry",
            offset: self.offset as u64,
        })
    }

    pub fn set_d_val(&self, buf: &mut [u8], value: u64) -> bool {
        write_u64(buf, self.offset + 8, value)
    }
}
