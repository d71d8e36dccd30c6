// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Description
//==================================================================================================

//! Patches 64-bit little-endian x86-64 ELF binaries to self-load additional instrumentation.
//!
//! Given a parsed [`Binary`], a set of trampoline [`MappingSet`] blobs, and a [`LoaderShim`]
//! payload, [`Emitter::emit`] produces a patched ELF image whose first-run behavior maps the
//! extra trampoline and loader pages, rewires control flow through them, and then falls through
//! to the original entry point. Four components run in sequence:
//!
//! 1. [`elf::validate`] — parses and rejects malformed input, classifies the binary, reserves the
//!    address ranges its `PT_LOAD` segments already claim.
//! 2. [`refactor`] — clusters patched pages that must be restored to their originals on disk, to
//!    be re-installed at runtime by the loader shim.
//! 3. [`map_record`] — serializes trampoline and refactor ranges into the compact on-disk mapping
//!    format.
//! 4. [`inject`] — lays out the configuration record, mapping arrays, entry shim, and repurposed
//!    program header, and rewires the entry point.

//==================================================================================================
// Modules
//==================================================================================================

pub mod binary;
pub mod bytes;
pub mod config;
pub mod config_record;
pub mod elf;
pub mod error;
pub mod inject;
pub mod map_record;
pub mod mapping;
pub mod refactor;
pub mod reserve;
pub mod shim;

#[cfg(test)]
mod fixtures;

//==================================================================================================
// Exports
//==================================================================================================

pub use binary::{
    Binary,
    Instruction,
    InstructionIndex,
};
pub use config::{
    Context,
    LoaderPhdrChoice,
    Stats,
};
pub use error::{
    EmitError,
    OverflowDirection,
    Result,
};
pub use inject::{
    EmittedImage,
    Emitter,
};
pub use mapping::{
    Mapping,
    MappingBlock,
    MappingSet,
    Prot,
};
pub use reserve::{
    RangeReservation,
    ReservationOracle,
};
pub use shim::{
    LoaderShim,
    StubLoaderShim,
};
