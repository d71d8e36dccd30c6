// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Description
//==================================================================================================

//! Minimal ELF64 byte-buffer builders shared by this crate's own unit tests. Not part of the
//! public API; integration tests under `tests/` keep their own copy (`tests/support.rs`) since
//! they compile as a separate crate.

#![cfg(test)]

use crate::elf::types;

///
/// # Description
///
/// Describes one additional program header to splice into a fixture built by
/// [`build_minimal_elf`].
///
#[derive(Debug, Clone, Copy)]
pub struct PhdrSpec {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_vaddr: u64,
    pub p_offset: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
}

///
/// # Description
///
/// Builds a minimal, structurally valid ELF64 `e_type` image: one `PT_LOAD` segment covering the
/// header and program header table, plus whatever `extra_phdrs` the caller supplies.
///
pub fn build_minimal_elf(e_type: u16, extra_phdrs: &[PhdrSpec]) -> Vec<u8> {
    let phnum = 1 + extra_phdrs.len();
    let phoff = types::EHDR64_SIZE;
    let phdr_table_end = phoff + phnum * types::PHDR64_SIZE;

    let mut end = phdr_table_end as u64;
    for spec in extra_phdrs {
        end = end.max(spec.p_offset + spec.p_filesz);
    }
    let mut buf = vec![0u8; end as usize];

    // e_ident
    buf[0] = types::ELFMAG0;
    buf[1] = types::ELFMAG1;
    buf[2] = types::ELFMAG2;
    buf[3] = types::ELFMAG3;
    buf[types::EI_CLASS] = types::ELFCLASS64;
    buf[types::EI_DATA] = types::ELFDATA2LSB;
    buf[types::EI_VERSION] = types::EV_CURRENT as u8;

    crate::bytes::write_u16(&mut buf, 16, e_type);
    crate::bytes::write_u16(&mut buf, 18, types::EM_X86_64);
    crate::bytes::write_u32(&mut buf, 20, types::EV_CURRENT);
    crate::bytes::write_u64(&mut buf, 24, 0x40_1000); // e_entry
    crate::bytes::write_u64(&mut buf, 32, phoff as u64); // e_phoff
    crate::bytes::write_u64(&mut buf, 40, 0); // e_shoff
    crate::bytes::write_u16(&mut buf, 54, types::PHDR64_SIZE as u16); // e_phentsize
    crate::bytes::write_u16(&mut buf, 56, phnum as u16); // e_phnum

    // Program header 0: PT_LOAD covering the header + phdr table.
    let ph0 = phoff;
    crate::bytes::write_u32(&mut buf, ph0, types::PT_LOAD);
    crate::bytes::write_u32(&mut buf, ph0 + 4, types::PF_R | types::PF_X);
    crate::bytes::write_u64(&mut buf, ph0 + 8, 0); // p_offset
    crate::bytes::write_u64(&mut buf, ph0 + 16, 0x40_0000); // p_vaddr
    crate::bytes::write_u64(&mut buf, ph0 + 32, phdr_table_end as u64); // p_filesz
    crate::bytes::write_u64(&mut buf, ph0 + 40, phdr_table_end as u64); // p_memsz

    for (i, spec) in extra_phdrs.iter().enumerate() {
        let ph = phoff + (i + 1) * types::PHDR64_SIZE;
        crate::bytes::write_u32(&mut buf, ph, spec.p_type);
        crate::bytes::write_u32(&mut buf, ph + 4, spec.p_flags);
        crate::bytes::write_u64(&mut buf, ph + 8, spec.p_offset);
        crate::bytes::write_u64(&mut buf, ph + 16, spec.p_vaddr);
        crate::bytes::write_u64(&mut buf, ph + 32, spec.p_filesz);
        crate::bytes::write_u64(&mut buf, ph + 40, spec.p_memsz);
    }

    buf
}
