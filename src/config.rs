// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use log::warn;

//==================================================================================================
// Constants
//==================================================================================================

pub mod layout {
    ///
    /// # Description
    ///
    /// Page size assumed throughout the emission core. All alignment, `map_record` division, and
    /// the config region's trailing padding are expressed in units of this constant.
    ///
    pub const PAGE_SIZE: u64 = 0x1000;

    ///
    /// # Description
    ///
    /// Low guard region reserved against future allocations for `ET_EXEC` binaries (§4.1).
    ///
    pub const LOW_GUARD_END: u64 = 0x10000;

    ///
    /// # Description
    ///
    /// Start of the negative half of the address space, reserved for non-PIE and DSO-mode
    /// binaries because the dynamic linker claims it for other libraries (§4.1).
    ///
    pub const RELATIVE_ADDRESS_MIN: u64 = 0x8000_0000_0000_0000;

    ///
    /// # Description
    ///
    /// Rough upper bound on the size of the injected config region (config record, extension,
    /// init table, mapping arrays, entry shim, loader blob) used only to pre-size buffers.
    ///
    pub const CONFIG_REGION_BUDGET: usize = 16 * 1024;

    ///
    /// # Description
    ///
    /// Default refactor-clustering budget (§4.2): the maximum gap, in bytes, tolerated between a
    /// refactor cluster's current end and the next dirty page before a new cluster starts. The
    /// distilled spec takes `mapping_size` as a given parameter without fixing its value; this
    /// default targets one huge-page-sized trampoline region (Open Question, resolved in
    /// DESIGN.md).
    ///
    pub const DEFAULT_REFACTOR_MAPPING_SIZE: u64 = 0x20_0000;
}

//==================================================================================================
// Enumerations
//==================================================================================================

///
/// # Description
///
/// Selects which non-`PT_LOAD` program header slot the Loader Injector repurposes in Step M.
/// `Auto` reproduces the distilled spec's stated preference order; the explicit variants let a
/// caller force a specific slot (Open Question, §9, resolved in `DESIGN.md`).
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoaderPhdrChoice {
    #[default]
    Auto,
    Note,
    GnuRelro,
    GnuStack,
}

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// Per-invocation options threaded into the emitter. The distilled spec's global, process-wide
/// options (`loader_base_option`, `loader_static_mode`, `loader_phdr_choice`, `trap_entry`,
/// `mem_rebase`) become fields here instead of process-wide mutable state (Design Notes §9).
///
#[derive(Debug, Clone)]
pub struct Context {
    /// Virtual address at which the loader payload is requested to live.
    pub loader_base: u64,
    /// Disables the refactor planner entirely when set (§4.2, step 1).
    pub static_mode: bool,
    /// Which program header slot Step M should repurpose.
    pub phdr_choice: LoaderPhdrChoice,
    /// Prepends a single `0xCC` byte to the entry shim when set (§4.4, Step J).
    pub trap_entry: bool,
    /// Accepted but ignored on ELF; a warning is logged once if set (§6).
    pub mem_rebase: bool,
    /// Refactor-clustering budget passed to the planner (§4.2 "mapping_size").
    pub refactor_mapping_size: u64,
}

impl Context {
    ///
    /// # Description
    ///
    /// Builds a `Context` for the given loader base, with every other option at its default
    /// (dynamic refactoring enabled, automatic PHDR selection, no trap, no rebase).
    ///
    pub fn new(loader_base: u64) -> Self {
        Self {
            loader_base,
            static_mode: false,
            phdr_choice: LoaderPhdrChoice::Auto,
            trap_entry: false,
            mem_rebase: false,
            refactor_mapping_size: layout::DEFAULT_REFACTOR_MAPPING_SIZE,
        }
    }

    ///
    /// # Description
    ///
    /// Emits the non-fatal warning required when `mem_rebase` is set: the option is accepted for
    /// interface compatibility but has no effect on ELF targets (§6, §7).
    ///
    pub fn warn_ignored_options(&self) {
        if self.mem_rebase {
            warn!("--mem-rebase has no effect on ELF targets; ignoring");
        }
    }
}

///
/// # Description
///
/// Byte-accounting statistics accumulated while emitting mapping arrays (§4.4, Step G), returned
/// to the caller instead of living in process-wide counters (Design Notes §9).
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Sum of mapping sizes seen during the preload pass.
    pub physical_bytes: u64,
    /// Sum of dense sub-range lengths seen across both passes.
    pub virtual_bytes: u64,
}
