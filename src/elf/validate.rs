// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use crate::{
    config::layout::{
        LOW_GUARD_END,
        RELATIVE_ADDRESS_MIN,
    },
    elf::types::{
        self,
        Ehdr64View,
        Phdr64View,
    },
    error::{
        EmitError,
        Result,
    },
    reserve::{
        reserve_or_conflict,
        ReservationOracle,
    },
};

//==================================================================================================
// Enumerations
//==================================================================================================

///
/// # Description
///
/// The mode the caller requested this binary be treated as. Disambiguates `ET_DYN`, which is
/// structurally identical for a PIE main executable and a shared object (§4.1).
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Executable,
    SharedObject,
}

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// Pointers to the program headers the rest of the core cares about, plus every `PT_LOAD`
/// segment's view (needed by the Refactor Planner's and Mapping Emitter's callers, and by Step M's
/// search over non-load segments).
///
#[derive(Debug, Clone)]
pub struct ElfPointers {
    pub ehdr: Ehdr64View,
    pub dynamic: Option<Phdr64View>,
    pub note: Option<Phdr64View>,
    pub gnu_relro: Option<Phdr64View>,
    pub gnu_stack: Option<Phdr64View>,
    pub all_phdrs: Vec<Phdr64View>,
}

///
/// # Description
///
/// Result of validating and classifying an ELF image (§4.1).
///
#[derive(Debug, Clone)]
pub struct ValidatedElf {
    pub pointers: ElfPointers,
    /// Whether the binary is position-independent code.
    pub pic: bool,
    /// Whether the binary is a position-independent *executable* (as opposed to a DSO).
    pub pie: bool,
}

//==================================================================================================
// Standalone Functions
//==================================================================================================

///
/// # Description
///
/// Parses the ELF header and program headers of `buf`, rejecting any structural violation listed
/// in §4.1, classifies the file, and reserves the virtual-address ranges it already claims.
///
/// # Parameters
///
/// - `buf`: the raw input file bytes.
/// - `mode`: the mode the caller expects this binary to be treated as.
/// - `oracle`: the address-space reservation collaborator (§6).
///
/// # Returns
///
/// On success, the populated [`ValidatedElf`]. On failure, the first violated rejection
/// condition, as an [`EmitError`].
///
pub fn validate(buf: &[u8], mode: Mode, oracle: &mut dyn ReservationOracle) -> Result<ValidatedElf> {
    if buf.len() < types::EHDR64_SIZE {
        return Err(EmitError::MalformedInput {
            reason: "file shorter than an ELF header",
            offset: 0,
        });
    }

    let ehdr = Ehdr64View::new(0);
    check_magic(buf, &ehdr)?;
    check_class_and_encoding(buf, &ehdr)?;
    check_version(buf, &ehdr)?;
    check_machine(buf, &ehdr)?;

    let e_type = ehdr.e_type(buf)?;
    if e_type != types::ET_EXEC && e_type != types::ET_DYN {
        return Err(EmitError::MalformedInput {
            reason: "object type is neither ET_EXEC nor ET_DYN",
            offset: ehdr.offset as u64 + 16,
        });
    }
    if e_type == types::ET_EXEC && mode == Mode::SharedObject {
        return Err(EmitError::MalformedInput {
            reason: "ET_EXEC binary requested as a shared object",
            offset: ehdr.offset as u64 + 16,
        });
    }

    let all_phdrs = parse_program_headers(buf, &ehdr)?;

    let mut pointers = ElfPointers {
        ehdr,
        dynamic: None,
        note: None,
        gnu_relro: None,
        gnu_stack: None,
        all_phdrs: all_phdrs.clone(),
    };

    for phdr in &all_phdrs {
        let p_type = phdr.p_type(buf)?;
        match p_type {
            types::PT_DYNAMIC => {
                check_dynamic_bounds(buf, phdr)?;
                pointers.dynamic = Some(*phdr);
            },
            types::PT_NOTE => pointers.note = Some(*phdr),
            types::PT_GNU_RELRO => pointers.gnu_relro = Some(*phdr),
            types::PT_GNU_STACK => pointers.gnu_stack = Some(*phdr),
            _ => {},
        }
    }

    let (pic, pie) = classify_and_reserve(buf, e_type, mode, &all_phdrs, oracle)?;

    Ok(ValidatedElf { pointers, pic, pie })
}

fn check_magic(buf: &[u8], ehdr: &Ehdr64View) -> Result<()> {
    let magic = [
        ehdr.ident_byte(buf, 0)?,
        ehdr.ident_byte(buf, 1)?,
        ehdr.ident_byte(buf, 2)?,
        ehdr.ident_byte(buf, 3)?,
    ];
    if magic != [types::ELFMAG0, types::ELFMAG1, types::ELFMAG2, types::ELFMAG3] {
        return Err(EmitError::MalformedInput {
            reason: "bad ELF magic",
            offset: 0,
        });
    }
    Ok(())
}

fn check_class_and_encoding(buf: &[u8], ehdr: &Ehdr64View) -> Result<()> {
    if ehdr.ident_byte(buf, types::EI_CLASS)? != types::ELFCLASS64 {
        return Err(EmitError::MalformedInput {
            reason: "not a 64-bit ELF file",
            offset: types::EI_CLASS as u64,
        });
    }
    if ehdr.ident_byte(buf, types::EI_DATA)? != types::ELFDATA2LSB {
        return Err(EmitError::MalformedInput {
            reason: "not a little-endian ELF file",
            offset: types::EI_DATA as u64,
        });
    }
    Ok(())
}

fn check_version(buf: &[u8], ehdr: &Ehdr64View) -> Result<()> {
    if ehdr.ident_byte(buf, types::EI_VERSION)? as u32 != types::EV_CURRENT
        || ehdr.e_version(buf)? != types::EV_CURRENT
    {
        return Err(EmitError::MalformedInput {
            reason: "unknown ELF version",
            offset: types::EI_VERSION as u64,
        });
    }
    Ok(())
}

fn check_machine(buf: &[u8], ehdr: &Ehdr64View) -> Result<()> {
    if ehdr.e_machine(buf)? != types::EM_X86_64 {
        return Err(EmitError::MalformedInput {
            reason: "required machine architecture is not x86-64",
            offset: ehdr.offset as u64 + 18,
        });
    }
    Ok(())
}

fn parse_program_headers(buf: &[u8], ehdr: &Ehdr64View) -> Result<Vec<Phdr64View>> {
    let phoff = ehdr.e_phoff(buf)?;
    let phnum = ehdr.e_phnum(buf)?;
    let phentsize = ehdr.e_phentsize(buf)?;

    if phnum >= types::PN_XNUM {
        return Err(EmitError::MalformedInput {
            reason: "extended program header count (PN_XNUM) is not supported",
            offset: ehdr.offset as u64 + 56,
        });
    }
    if phoff as usize > buf.len() {
        return Err(EmitError::MalformedInput {
            reason: "e_phoff lies outside the file body",
            offset: phoff,
        });
    }
    if phentsize as usize != types::PHDR64_SIZE {
        return Err(EmitError::MalformedInput {
            reason: "unexpected program header entry size",
            offset: ehdr.offset as u64 + 54,
        });
    }

    let table_len = phnum as u64 * phentsize as u64;
    let table_end = phoff.checked_add(table_len).ok_or(EmitError::MalformedInput {
        reason: "program header table size overflows file bounds",
        offset: phoff,
    })?;
    if table_end > buf.len() as u64 {
        return Err(EmitError::MalformedInput {
            reason: "program header table is truncated",
            offset: phoff,
        });
    }

    let mut phdrs = Vec::with_capacity(phnum as usize);
    for i in 0..phnum as u64 {
        phdrs.push(Phdr64View::new((phoff + i * phentsize as u64) as usize));
    }
    Ok(phdrs)
}

fn check_dynamic_bounds(buf: &[u8], phdr: &Phdr64View) -> Result<()> {
    let offset = phdr.p_offset(buf)?;
    let filesz = phdr.p_filesz(buf)?;
    let end = offset.checked_add(filesz).ok_or(EmitError::MalformedInput {
        reason: "PT_DYNAMIC size overflows file bounds",
        offset,
    })?;
    if end > buf.len() as u64 {
        return Err(EmitError::MalformedInput {
            reason: "PT_DYNAMIC contents extend past file end",
            offset,
        });
    }
    Ok(())
}

fn classify_and_reserve(
    buf: &[u8],
    e_type: u16,
    mode: Mode,
    all_phdrs: &[Phdr64View],
    oracle: &mut dyn ReservationOracle,
) -> Result<(bool, bool)> {
    let (pic, pie) = match (e_type, mode) {
        (types::ET_DYN, Mode::Executable) => (true, true),
        (types::ET_DYN, Mode::SharedObject) => (true, false),
        (types::ET_EXEC, _) => (false, false),
        _ => unreachable!("object type already validated to be ET_EXEC or ET_DYN"),
    };

    if e_type == types::ET_EXEC {
        reserve_or_conflict(oracle, 0, LOW_GUARD_END)?;
    }
    if !pie {
        // The negative half of the address space is unsafe to claim: the dynamic linker uses it
        // for other libraries (§4.1). `u64::MAX` approximates "to the top of the address space"
        // since the reservation range is conceptually `[RELATIVE_ADDRESS_MIN, 2**64)`.
        reserve_or_conflict(oracle, RELATIVE_ADDRESS_MIN, u64::MAX)?;
    }

    for phdr in all_phdrs {
        if phdr.p_type(buf)? != types::PT_LOAD {
            continue;
        }
        let vaddr = phdr.p_vaddr(buf)?;
        let memsz = phdr.p_memsz(buf)?;
        let end = vaddr.checked_add(memsz).ok_or(EmitError::MalformedInput {
            reason: "PT_LOAD segment size overflows address space",
            offset: vaddr,
        })?;
        reserve_or_conflict(oracle, vaddr, end)?;
    }

    Ok((pic, pie))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reserve::RangeReservation;

    fn minimal_exec() -> Vec<u8> {
        crate::fixtures::build_minimal_elf(types::ET_EXEC, &[])
    }

    #[test]
    fn rejects_short_file() {
        let mut oracle = RangeReservation::new();
        let err = validate(&[0u8; 4], Mode::Executable, &mut oracle).unwrap_err();
        assert!(matches!(err, EmitError::MalformedInput { .. }));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = minimal_exec();
        buf[0] = 0;
        let mut oracle = RangeReservation::new();
        let err = validate(&buf, Mode::Executable, &mut oracle).unwrap_err();
        assert!(matches!(err, EmitError::MalformedInput { .. }));
    }

    #[test]
    fn accepts_minimal_exec() {
        let buf = minimal_exec();
        let mut oracle = RangeReservation::new();
        let validated = validate(&buf, Mode::Executable, &mut oracle).expect("should validate");
        assert!(!validated.pic);
        assert!(!validated.pie);
    }

    #[test]
    fn rejects_mode_mismatch() {
        let buf = minimal_exec();
        let mut oracle = RangeReservation::new();
        let err = validate(&buf, Mode::SharedObject, &mut oracle).unwrap_err();
        assert!(matches!(err, EmitError::MalformedInput { .. }));
    }
}
