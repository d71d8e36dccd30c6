// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use thiserror::Error;

//==================================================================================================
// Enumerations
//==================================================================================================

///
/// # Description
///
/// Closed set of ways an emission can fail. Every variant is fatal to the emission in progress;
/// there is no local recovery (see `SPEC_FULL.md` §7).
///
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum EmitError {
    /// The input does not parse as a supported ELF file, or fails a structural check in the
    /// validator (§4.1).
    #[error("malformed input: {reason} (offset {offset:#x})")]
    MalformedInput { reason: &'static str, offset: u64 },

    /// A mapping's address, length, or file offset does not fit the on-disk `map_record` field
    /// it is destined for (§4.3).
    #[error("overflow writing map_record field `{field}`: value {value:#x} ({direction})")]
    OverflowError {
        field: &'static str,
        value: i128,
        direction: OverflowDirection,
    },

    /// DSO-mode entry rewiring requires a `DT_INIT` entry in `PT_DYNAMIC`; none was found.
    #[error("no DT_INIT entry found in PT_DYNAMIC")]
    MissingInit,

    /// DSO-mode entry rewiring requires `PT_DYNAMIC`; the binary has none.
    #[error("binary has no PT_DYNAMIC segment")]
    MissingDynamic,

    /// PHDR repurposing requires one of `PT_NOTE` / `PT_GNU_RELRO` / `PT_GNU_STACK`; the binary
    /// has none of them.
    #[error("no PT_NOTE, PT_GNU_RELRO, or PT_GNU_STACK slot available to repurpose")]
    NoInjectionSlot,

    /// The largest non-absolute mapping base exceeds the requested loader base.
    #[error("mapping base {mapping_base:#x} exceeds loader base {loader_base:#x}")]
    LoaderBaseTooLow { mapping_base: u64, loader_base: u64 },

    /// A `PT_LOAD` segment overlaps the low-address guard region or a prior reservation.
    #[error("reservation conflict: [{lo:#x}, {hi:#x}) overlaps an existing reservation")]
    ReservationConflict { lo: u64, hi: u64 },

    /// A dirty page exists with no instruction covering it. This reflects a broken invariant in
    /// the upstream instruction index, not a problem with the input ELF (§9, Open Question a).
    #[error("internal error: dirty page at file offset {offset:#x} has no covering instruction")]
    InternalError { offset: u64 },
}

///
/// # Description
///
/// Distinguishes an address that is too negative from one that is too large, so callers of
/// [`EmitError::OverflowError`] can tell the two failure modes apart (§4.3).
///
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum OverflowDirection {
    Under,
    Over,
}

impl core::fmt::Display for OverflowDirection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OverflowDirection::Under => write!(f, "underflow"),
            OverflowDirection::Over => write!(f, "overflow"),
        }
    }
}

//==================================================================================================
// Type Aliases
//==================================================================================================

pub type Result<T> = core::result::Result<T, EmitError>;
