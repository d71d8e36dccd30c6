// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//! Minimal ELF64 byte-buffer builders for integration tests. Integration tests compile as a
//! separate crate and cannot see the library's own `#[cfg(test)]` fixtures module, so this is a
//! deliberate, small duplication of `src/fixtures.rs`.

use emitelf::bytes;

pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;
pub const EI_VERSION: usize = 6;

pub const ELFCLASS64: u8 = 2;
pub const ELFDATA2LSB: u8 = 1;
pub const EV_CURRENT: u32 = 1;

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;
pub const EM_X86_64: u16 = 62;

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_NOTE: u32 = 4;
pub const PT_GNU_RELRO: u32 = 0x6474_e552;

pub const PF_R: u32 = 1 << 2;
pub const PF_X: u32 = 1 << 0;

pub const DT_INIT: u64 = 12;
pub const DT_NULL: u64 = 0;

pub const EHDR64_SIZE: usize = 64;
pub const PHDR64_SIZE: usize = 56;
pub const DYN64_SIZE: usize = 16;

pub struct PhdrSpec {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_vaddr: u64,
    pub p_offset: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
}

/// Builds a minimal, structurally valid ELF64 image with one `PT_LOAD` segment covering the
/// header and program header table, plus whatever `extra_phdrs` the caller supplies.
pub fn build_minimal_elf(e_type: u16, extra_phdrs: &[PhdrSpec]) -> Vec<u8> {
    let phnum = 1 + extra_phdrs.len();
    let phoff = EHDR64_SIZE;
    let phdr_table_end = phoff + phnum * PHDR64_SIZE;

    let mut end = phdr_table_end as u64;
    for spec in extra_phdrs {
        end = end.max(spec.p_offset + spec.p_filesz);
    }
    let mut buf = vec![0u8; end as usize];

    buf[0] = 0x7f;
    buf[1] = b'E';
    buf[2] = b'L';
    buf[3] = b'F';
    buf[EI_CLASS] = ELFCLASS64;
    buf[EI_DATA] = ELFDATA2LSB;
    buf[EI_VERSION] = EV_CURRENT as u8;

    bytes::write_u16(&mut buf, 16, e_type);
    bytes::write_u16(&mut buf, 18, EM_X86_64);
    bytes::write_u32(&mut buf, 20, EV_CURRENT);
    bytes::write_u64(&mut buf, 24, 0x40_1000);
    bytes::write_u64(&mut buf, 32, phoff as u64);
    bytes::write_u64(&mut buf, 40, 0);
    bytes::write_u16(&mut buf, 54, PHDR64_SIZE as u16);
    bytes::write_u16(&mut buf, 56, phnum as u16);

    let ph0 = phoff;
    bytes::write_u32(&mut buf, ph0, PT_LOAD);
    bytes::write_u32(&mut buf, ph0 + 4, PF_R | PF_X);
    bytes::write_u64(&mut buf, ph0 + 8, 0);
    bytes::write_u64(&mut buf, ph0 + 16, 0x40_0000);
    bytes::write_u64(&mut buf, ph0 + 32, phdr_table_end as u64);
    bytes::write_u64(&mut buf, ph0 + 40, phdr_table_end as u64);

    for (i, spec) in extra_phdrs.iter().enumerate() {
        let ph = phoff + (i + 1) * PHDR64_SIZE;
        bytes::write_u32(&mut buf, ph, spec.p_type);
        bytes::write_u32(&mut buf, ph + 4, spec.p_flags);
        bytes::write_u64(&mut buf, ph + 8, spec.p_offset);
        bytes::write_u64(&mut buf, ph + 16, spec.p_vaddr);
        bytes::write_u64(&mut buf, ph + 32, spec.p_filesz);
        bytes::write_u64(&mut buf, ph + 40, spec.p_memsz);
    }

    buf
}

/// File offset the dynamic table will sit at for a fixture built with `extra_phdr_count` extra
/// program headers: immediately after the program header table.
pub fn dynamic_table_offset(extra_phdr_count: usize) -> u64 {
    (EHDR64_SIZE + (1 + extra_phdr_count) * PHDR64_SIZE) as u64
}

/// A `PT_DYNAMIC` header spec covering one `DT_INIT` entry followed by a `DT_NULL` terminator,
/// placed at `offset` (see [`dynamic_table_offset`]).
pub fn dynamic_phdr(offset: u64) -> PhdrSpec {
    PhdrSpec {
        p_type: PT_DYNAMIC,
        p_flags: PF_R,
        p_vaddr: offset,
        p_offset: offset,
        p_filesz: DYN64_SIZE as u64 * 2,
        p_memsz: DYN64_SIZE as u64 * 2,
    }
}

/// Writes a `DT_INIT`/`DT_NULL` dynamic table into an already-sized buffer at `offset` (the
/// buffer must already extend at least `offset + 32` bytes, which `build_minimal_elf` guarantees
/// when given the matching [`dynamic_phdr`]).
pub fn write_dynamic_entries(buf: &mut [u8], offset: u64, init_addr: u64) {
    let off = offset as usize;
    bytes::write_u64(buf, off, DT_INIT);
    bytes::write_u64(buf, off + 8, init_addr);
    bytes::write_u64(buf, off + 16, DT_NULL);
    bytes::write_u64(buf, off + 24, 0);
}
