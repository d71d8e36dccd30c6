// Copyright(c) The Contributors of this project.
// Licensed under the MIT License.

//==================================================================================================
// Imports
//==================================================================================================

use crate::bytes::{
    round_down,
    round_up,
};

//==================================================================================================
// Structures
//==================================================================================================

///
/// # Description
///
/// Protection bits requested for a mapping or refactor (§3, §4.4 Step H).
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Prot {
    pub r: bool,
    pub w: bool,
    pub x: bool,
}

impl Prot {
    pub const RX: Prot = Prot { r: true, w: false, x: true };
    pub const RW: Prot = Prot { r: true, w: true, x: false };
    pub const RO: Prot = Prot { r: true, w: false, x: false };
}

///
/// # Description
///
/// One sparsely-populated byte range within a [`Mapping`]'s virtual footprint. The upstream
/// instruction-stream builder hands mappings over as a "pre-flattened mapping set" (§1); this is
/// the shape that flattening takes — a list of byte blocks at known offsets within the mapping,
/// with gaps in between (§3 expansion).
///
#[derive(Debug, Clone)]
pub struct MappingBlock {
    /// Offset of this block within the mapping's `base..base+size` span.
    pub offset: u64,
    pub bytes: Vec<u8>,
}

///
/// # Description
///
/// A trampoline region to be installed at load time (§3).
///
#[derive(Debug, Clone)]
pub struct Mapping {
    pub base: u64,
    pub size: u64,
    /// File offset this mapping was emitted at; populated by the Loader Injector (§4.4 Step C).
    pub offset: Option<u64>,
    pub prot: Prot,
    pub preload: bool,
    /// Index, within the owning [`MappingSet`], of the next mapping sharing this one's on-disk
    /// blob, or `None` if this is the last (or only) node in the chain.
    pub merged_next: Option<usize>,
    pub blocks: Vec<MappingBlock>,
}

impl Mapping {
    ///
    /// # Description
    ///
    /// Writes this mapping's sparse byte payload into `dst` (which must be exactly `self.size`
    /// bytes long), filling every byte not covered by a block with `fill` (§4.4 Step C: "padding
    /// holes with `0xCC` / `int3`").
    ///
    pub fn flatten_into(&self, dst: &mut [u8], fill: u8) {
        debug_assert_eq!(dst.len() as u64, self.size);
        dst.fill(fill);
        for block in &self.blocks {
            let start = block.offset as usize;
            let end = start + block.bytes.len();
            if end <= dst.len() {
                dst[start..end].copy_from_slice(&block.bytes);
            }
        }
    }

    ///
    /// # Description
    ///
    /// Returns the maximal contiguous sub-ranges, in ascending order, within `0..self.size` that
    /// actually carry bytes, each expanded to whole pages of `page_size` (§3, §4.4 Step G).
    ///
    pub fn virtual_bounds(&self, page_size: u64) -> Vec<(u64, u64)> {
        let mut raw: Vec<(u64, u64)> = self
            .blocks
            .iter()
            .filter(|b| !b.bytes.is_empty())
            .map(|b| (b.offset, b.offset + b.bytes.len() as u64))
            .collect();
        raw.sort_unstable_by_key(|&(lb, _)| lb);

        let mut pages: Vec<(u64, u64)> = raw
            .into_iter()
            .map(|(lb, ub)| {
                let lb = round_down(lb, page_size);
                let ub = round_up(ub, page_size).min(round_up(self.size, page_size));
                (lb, ub)
            })
            .collect();

        merge_ranges(&mut pages);
        pages
    }
}

fn merge_ranges(ranges: &mut Vec<(u64, u64)>) {
    if ranges.is_empty() {
        return;
    }
    ranges.sort_unstable_by_key(|&(lb, _)| lb);
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
    for &(lb, ub) in ranges.iter() {
        match merged.last_mut() {
            Some(&mut (_, ref mut prev_ub)) if lb <= *prev_ub => {
                *prev_ub = (*prev_ub).max(ub);
            },
            _ => merged.push((lb, ub)),
        }
    }
    *ranges = merged;
}

///
/// # Description
///
/// The full collection of mappings handed to the Loader Injector, together with chain-traversal
/// helpers over the `merged_next` links (§3 "merged").
///
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    pub mappings: Vec<Mapping>,
}

impl MappingSet {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        Self { mappings }
    }

    ///
    /// # Description
    ///
    /// Iterates the indices of every node in the chain starting at `head`, head included.
    ///
    pub fn chain_from(&self, head: usize) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = Some(head);
        core::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.mappings[current].merged_next;
            Some(current)
        })
    }

    ///
    /// # Description
    ///
    /// Indices of every chain head (a mapping that is not itself the `merged_next` of another),
    /// in the order they appear in `mappings`. The Loader Injector iterates heads, then walks
    /// each chain via [`MappingSet::chain_from`] (§4.4 Step G).
    ///
    pub fn heads(&self) -> Vec<usize> {
        let merged_targets: std::collections::HashSet<usize> =
            self.mappings.iter().filter_map(|m| m.merged_next).collect();
        (0..self.mappings.len()).filter(|i| !merged_targets.contains(i)).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flatten_pads_holes() {
        let mapping = Mapping {
            base: 0,
            size: 16,
            offset: None,
            prot: Prot::RX,
            preload: true,
            merged_next: None,
            blocks: vec![MappingBlock { offset: 4, bytes: vec![1, 2, 3] }],
        };
        let mut dst = vec![0u8; 16];
        mapping.flatten_into(&mut dst, 0xCC);
        assert_eq!(&dst[0..4], &[0xCC; 4]);
        assert_eq!(&dst[4..7], &[1, 2, 3]);
        assert_eq!(&dst[7..], &[0xCC; 9]);
    }

    #[test]
    fn virtual_bounds_merges_adjacent_pages() {
        let mapping = Mapping {
            base: 0,
            size: 0x3000,
            offset: None,
            prot: Prot::RX,
            preload: true,
            merged_next: None,
            blocks: vec![
                MappingBlock { offset: 0x10, bytes: vec![1] },
                MappingBlock { offset: 0x1010, bytes: vec![1] },
            ],
        };
        let bounds = mapping.virtual_bounds(0x1000);
        assert_eq!(bounds, vec![(0, 0x2000)]);
    }

    #[test]
    fn virtual_bounds_keeps_disjoint_ranges_separate() {
        let mapping = Mapping {
            base: 0,
            size: 0x5000,
            offset: None,
            prot: Prot::RX,
            preload: true,
            merged_next: None,
            blocks: vec![
                MappingBlock { offset: 0x10, bytes: vec![1] },
                MappingBlock { offset: 0x4010, bytes: vec![1] },
            ],
        };
        let bounds = mapping.virtual_bounds(0x1000);
        assert_eq!(bounds, vec![(0, 0x1000), (0x4000, 0x5000)]);
    }

    #[test]
    fn chain_traversal_follows_merged_next() {
        let set = MappingSet::new(vec![
            Mapping {
                base: 0,
                size: 0x1000,
                offset: None,
                prot: Prot::RX,
                preload: true,
                merged_next: Some(1),
                blocks: vec![],
            },
            Mapping {
                base: 0x1000,
                size: 0x1000,
                offset: None,
                prot: Prot::RX,
                preload: true,
                merged_next: None,
                blocks: vec![],
            },
        ]);
        assert_eq!(set.heads(), vec![0]);
        assert_eq!(set.chain_from(0).collect::<Vec<_>>(), vec![0, 1]);
    }
}
