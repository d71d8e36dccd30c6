// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use log::{
    error,
    trace,
};

use crate::{
    binary::Binary,
    config::{
        layout::PAGE_SIZE,
        Context,
        LoaderPhdrChoice,
        Stats,
    },
    config_record,
    elf::{
        types,
        validate::{
            ElfPointers,
            Mode,
        },
    },
    error::{
        EmitError,
        Result,
    },
    map_record::emit_map,
    mapping::{
        MappingSet,
        Prot,
    },
    refactor,
    shim::LoaderShim,
};

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// Final output of a successful emission: the complete patched file image plus byte-accounting
/// statistics gathered while emitting the mapping arrays (§4.4 Step G).
///
#[derive(Debug, Clone)]
pub struct EmittedImage {
    pub bytes: Vec<u8>,
    pub stats: Stats,
}

///
/// # Description
///
/// Drives the Loader Injector (§4.4) to completion. Consumes a validated [`Binary`] and the
/// mappings produced upstream, and owns the layout cursor (`binary.patched_bytes.len()`) for the
/// duration of one emission. Mirrors the teacher's `elf32_load`/`do_elf32_load` split: this is the
/// thin public entry point; the private step functions below are the worker (§4.4 expansion).
///
pub struct Emitter<'a, S: LoaderShim> {
    binary: Binary,
    mappings: MappingSet,
    elf: ElfPointers,
    ctx: Context,
    shim: &'a S,
}

impl<'a, S: LoaderShim> Emitter<'a, S> {
    pub fn new(binary: Binary, mappings: MappingSet, elf: ElfPointers, ctx: Context, shim: &'a S) -> Self {
        Self { binary, mappings, elf, ctx, shim }
    }

    ///
    /// # Description
    ///
    /// Runs Steps A through M over `self`, returning the finished image or the first fatal error
    /// encountered (§4.4, §7).
    ///
    pub fn emit(mut self) -> Result<EmittedImage> {
        self.ctx.warn_ignored_options();

        // Step A.
        align_to_page(&mut self.binary.patched_bytes);

        // Step B.
        let mut refactors = if self.ctx.static_mode {
            Vec::new()
        } else {
            let plan = refactor::plan(&self.binary, self.ctx.refactor_mapping_size)?;
            trace!("refactor planner produced {} cluster(s)", plan.len());
            plan
        };
        if !refactors.is_empty() {
            let grown = refactor::apply(&mut self.binary, &mut refactors);
            trace!("refactor planner relocated {grown} byte(s)");
        }

        // Step C.
        self.emit_trampoline_blobs();

        // Step D.
        align_to_page(&mut self.binary.patched_bytes);
        let config_offset = self.binary.patched_bytes.len();

        // Step E.
        config_record::write_placeholder(&mut self.binary.patched_bytes, self.ctx.loader_base)?;
        if let Some(mmap) = self.binary.mmap_hint {
            config_record::set_mmap(&mut self.binary.patched_bytes, config_offset, mmap)?;
        }

        // Step F.
        self.emit_init_table(config_offset)?;

        // Step G + H.
        let (stats, mut ub) = self.emit_mapping_arrays(config_offset, &refactors)?;

        // Step I.
        if let Some(max_base) = ub.take() {
            if max_base > self.ctx.loader_base {
                error!("loader base {:#x} too low for mapping base {:#x}", self.ctx.loader_base, max_base);
                return Err(EmitError::LoaderBaseTooLow {
                    mapping_base: max_base,
                    loader_base: self.ctx.loader_base,
                });
            }
        }

        // Step J.
        let entry = self.emit_entry_shim(config_offset)?;

        // Step K.
        let region_len = self.binary.patched_bytes.len() as u64 - config_offset as u64;
        let config_size_rounded = crate::bytes::round_up(region_len, PAGE_SIZE);
        config_record::set_size(&mut self.binary.patched_bytes, config_offset, config_size_rounded as u32)?;
        self.binary.patched_bytes.resize(config_offset + config_size_rounded as usize, 0);

        // Step L.
        self.rewire_entry_point(config_offset, entry)?;

        // Step M.
        self.repurpose_phdr(config_offset, region_len)?;

        Ok(EmittedImage { bytes: self.binary.patched_bytes, stats })
    }

    fn emit_trampoline_blobs(&mut self) {
        let heads = self.mappings.heads();
        for head in heads {
            let offset = self.binary.patched_bytes.len() as u64;
            let size = self.mappings.mappings[head].size as usize;
            let mut blob = vec![0u8; size];
            self.mappings.mappings[head].flatten_into(&mut blob, 0xCC);
            self.binary.patched_bytes.extend_from_slice(&blob);
            self.mappings.mappings[head].offset = Some(offset);

            // Chain members sharing this blob (§3 "merged") point at the same offset; their own
            // sub-ranges are located within it by `virtual_bounds` in Step G.
            let chain: Vec<usize> = self.mappings.chain_from(head).skip(1).collect();
            for node in chain {
                self.mappings.mappings[node].offset = Some(offset);
            }
        }
    }

    fn emit_init_table(&mut self, config_offset: usize) -> Result<()> {
        let inits_rel = self.binary.patched_bytes.len() as u64 - config_offset as u64;
        for &addr in &self.binary.init_functions {
            self.binary.patched_bytes.extend_from_slice(&addr.to_le_bytes());
        }
        config_record::set_inits_offset(&mut self.binary.patched_bytes, config_offset, inits_rel)?;
        config_record::set_num_inits(&mut self.binary.patched_bytes, config_offset, self.binary.init_functions.len() as u32)?;
        Ok(())
    }

    fn emit_mapping_arrays(
        &mut self,
        config_offset: usize,
        refactors: &[refactor::Refactor],
    ) -> Result<(Stats, Option<u64>)> {
        let mut stats = Stats::default();
        let mut ub: Option<u64> = None;
        let heads = self.mappings.heads();

        for (pass_index, preload) in [true, false].into_iter().enumerate() {
            let maps_rel = self.binary.patched_bytes.len() as u64 - config_offset as u64;
            config_record::set_maps_offset(&mut self.binary.patched_bytes, config_offset, pass_index, maps_rel)?;

            let mut count = 0u32;
            for &head in &heads {
                if self.mappings.mappings[head].preload != preload {
                    continue;
                }
                let chain: Vec<usize> = self.mappings.chain_from(head).collect();
                for node in chain {
                    let mapping = &self.mappings.mappings[node];
                    let bounds = mapping.virtual_bounds(PAGE_SIZE);
                    let base_offset = mapping.offset.ok_or(EmitError::InternalError {
                        offset: config_offset as u64,
                    })?;

                    for (lb, range_ub) in bounds {
                        let addr = mapping.base + lb;
                        let len = range_ub - lb;
                        let offset = base_offset + lb;
                        emit_map(&mut self.binary.patched_bytes, addr, len, offset, mapping.prot, &mut ub)?;
                        count += 1;
                        stats.virtual_bytes += len;
                    }
                    if preload {
                        stats.physical_bytes += mapping.size;
                    }
                }
            }

            if preload {
                config_record::set_num_maps(&mut self.binary.patched_bytes, config_offset, pass_index, count)?;
            } else {
                // Step H: refactor mappings join the postload array before its count is finalized.
                for r in refactors {
                    let patched_offset = r.patched_offset.ok_or(EmitError::InternalError {
                        offset: config_offset as u64,
                    })?;
                    emit_map(&mut self.binary.patched_bytes, r.addr, r.size, patched_offset, Prot::RX, &mut ub)?;
                    stats.virtual_bytes += r.size;
                    count += 1;
                }
                config_record::set_num_maps(&mut self.binary.patched_bytes, config_offset, pass_index, count)?;
            }
        }

        Ok((stats, ub))
    }

    fn emit_entry_shim(&mut self, config_offset: usize) -> Result<u64> {
        let shim_start_rel = self.binary.patched_bytes.len() as u64 - config_offset as u64;
        let entry = self.ctx.loader_base + shim_start_rel;

        if self.ctx.trap_entry {
            self.binary.patched_bytes.push(0xCC);
        }

        match self.binary.mode {
            Mode::Executable => {
                self.binary.patched_bytes.extend_from_slice(&[0x48, 0x8B, 0x3C, 0x24]); // mov (%rsp), %rdi
                self.binary.patched_bytes.extend_from_slice(&[0x48, 0x8D, 0x74, 0x24, 0x08]); // lea 8(%rsp), %rsi
            },
            Mode::SharedObject => {
                self.binary.patched_bytes.extend_from_slice(&[0x31, 0xFF, 0x31, 0xF6]); // xor %edi,%edi; xor %esi,%esi
            },
        }

        self.binary.patched_bytes.extend_from_slice(&[0x48, 0x8D, 0x15]); // lea <rel32>(%rip), %rdx
        let disp_field_start = self.binary.patched_bytes.len() as i64;
        let next_instr = disp_field_start + 4;
        let rel32 = config_offset as i64 - next_instr;
        self.binary.patched_bytes.extend_from_slice(&(rel32 as i32).to_le_bytes());

        self.binary.patched_bytes.extend_from_slice(self.shim.bytes());

        Ok(entry)
    }

    fn rewire_entry_point(&mut self, config_offset: usize, entry: u64) -> Result<()> {
        if let Some(dynamic) = self.elf.dynamic {
            let vaddr = dynamic.p_vaddr(&self.binary.patched_bytes)?;
            config_record::set_dynamic(&mut self.binary.patched_bytes, config_offset, vaddr)?;
        }

        match self.binary.mode {
            Mode::Executable => {
                let original_entry = self.elf.ehdr.e_entry(&self.binary.patched_bytes)?;
                config_record::set_entry(&mut self.binary.patched_bytes, config_offset, original_entry)?;
                self.elf.ehdr.set_e_entry(&mut self.binary.patched_bytes, entry)?;
                config_record::set_flags(&mut self.binary.patched_bytes, config_offset, config_record::EXECUTABLE_FLAG)?;
            },
            Mode::SharedObject => {
                let dynamic = self.elf.dynamic.ok_or(EmitError::MissingDynamic)?;
                let d_offset = dynamic.p_offset(&self.binary.patched_bytes)?;
                let d_filesz = dynamic.p_filesz(&self.binary.patched_bytes)?;

                let mut cursor = d_offset;
                let mut found = false;
                while cursor + types::DYN64_SIZE as u64 <= d_offset + d_filesz {
                    let entry_view = types::DynView::new(cursor as usize);
                    let tag = entry_view.d_tag(&self.binary.patched_bytes)?;
                    if tag == types::DT_NULL {
                        break;
                    }
                    if tag == types::DT_INIT {
                        let original_init = entry_view.d_val(&self.binary.patched_bytes)?;
                        config_record::set_entry(&mut self.binary.patched_bytes, config_offset, original_init)?;
                        entry_view.set_d_val(&mut self.binary.patched_bytes, entry);
                        found = true;
                        break;
                    }
                    cursor += types::DYN64_SIZE as u64;
                }
                if !found {
                    return Err(EmitError::MissingInit);
                }
            },
        }
        Ok(())
    }

    fn repurpose_phdr(&mut self, config_offset: usize, config_size_pre_round: u64) -> Result<()> {
        let slot = match self.ctx.phdr_choice {
            LoaderPhdrChoice::Auto => self
                .elf
                .note
                .or(self.elf.gnu_relro)
                .or(self.elf.gnu_stack)
                .ok_or(EmitError::NoInjectionSlot)?,
            LoaderPhdrChoice::Note => self.elf.note.ok_or(EmitError::NoInjectionSlot)?,
            LoaderPhdrChoice::GnuRelro => self.elf.gnu_relro.ok_or(EmitError::NoInjectionSlot)?,
            LoaderPhdrChoice::GnuStack => self.elf.gnu_stack.ok_or(EmitError::NoInjectionSlot)?,
        };

        let buf = &mut self.binary.patched_bytes;
        slot.set_p_type(buf, types::PT_LOAD);
        slot.set_p_flags(buf, types::PF_R | types::PF_X);
        slot.set_p_offset(buf, config_offset as u64);
        slot.set_p_vaddr(buf, self.ctx.loader_base);
        slot.set_p_paddr(buf, 0);
        slot.set_p_filesz(buf, config_size_pre_round);
        slot.set_p_memsz(buf, config_size_pre_round);
        slot.set_p_align(buf, PAGE_SIZE);
        Ok(())
    }
}

fn align_to_page(buf: &mut Vec<u8>) {
    let target = crate::bytes::round_up(buf.len() as u64, PAGE_SIZE) as usize;
    buf.resize(target, 0);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        binary::InstructionIndex,
        elf::{
            types::Ehdr64View,
            validate::{
                self,
                Mode,
            },
        },
        fixtures::{
            build_minimal_elf,
            PhdrSpec,
        },
        reserve::RangeReservation,
        shim::StubLoaderShim,
    };

    fn exec_with_note() -> (Vec<u8>, ElfPointers) {
        let note = PhdrSpec {
            p_type: types::PT_NOTE,
            p_flags: types::PF_R,
            p_vaddr: 0,
            p_offset: 0,
            p_filesz: 0,
            p_memsz: 0,
        };
        let bytes = build_minimal_elf(types::ET_EXEC, &[note]);
        let mut oracle = RangeReservation::new();
        let validated = validate::validate(&bytes, Mode::Executable, &mut oracle).expect("should validate");
        (bytes, validated.pointers)
    }

    fn binary_from(bytes: Vec<u8>, elf: ElfPointers) -> Binary {
        Binary {
            file_name: "test".into(),
            original_bytes: bytes.clone(),
            patched_bytes: bytes,
            mode: Mode::Executable,
            elf,
            instructions: InstructionIndex::from_sorted(vec![]),
            init_functions: vec![],
            mmap_hint: None,
            config_base: None,
        }
    }

    #[test]
    fn emits_magic_at_page_aligned_config_offset() {
        let (bytes, elf) = exec_with_note();
        let binary = binary_from(bytes, elf.clone());
        let ctx = Context::new(0x7000_0000);
        let shim = StubLoaderShim;

        let emitter = Emitter::new(binary, MappingSet::default(), elf, ctx, &shim);
        let image = emitter.emit().expect("should emit");

        let config_offset = image
            .bytes
            .windows(8)
            .position(|w| w == b"E9PATCH\0")
            .expect("magic must be present");
        assert_eq!(config_offset % PAGE_SIZE as usize, 0);
        assert_eq!(image.bytes.len() % PAGE_SIZE as usize, 0);
    }

    #[test]
    fn rewires_entry_point_and_repurposes_note() {
        let (bytes, elf) = exec_with_note();
        let ehdr = Ehdr64View::new(0);
        let original_entry = ehdr.e_entry(&bytes).unwrap();
        let binary = binary_from(bytes, elf.clone());
        let ctx = Context::new(0x7000_0000);
        let shim = StubLoaderShim;

        let note = elf.note.expect("fixture has a PT_NOTE");
        let emitter = Emitter::new(binary, MappingSet::default(), elf, ctx, &shim);
        let image = emitter.emit().expect("should emit");

        let new_entry = ehdr.e_entry(&image.bytes).unwrap();
        assert_ne!(new_entry, original_entry);
        assert_eq!(note.p_type(&image.bytes).unwrap(), types::PT_LOAD);
        assert_eq!(note.p_vaddr(&image.bytes).unwrap(), 0x7000_0000);
    }

    #[test]
    fn fails_without_an_injection_slot() {
        let bytes = build_minimal_elf(types::ET_EXEC, &[]);
        let mut oracle = RangeReservation::new();
        let validated = validate::validate(&bytes, Mode::Executable, &mut oracle).expect("should validate");
        let elf = validated.pointers;
        let binary = binary_from(bytes, elf.clone());
        let ctx = Context::new(0x7000_0000);
        let shim = StubLoaderShim;

        let emitter = Emitter::new(binary, MappingSet::default(), elf, ctx, &shim);
        let err = emitter.emit().unwrap_err();
        assert!(matches!(err, EmitError::NoInjectionSlot));
    }
}
