//! Block Allocation Table and chain coverage
//!
//! The BAT maps logical blocks to physical sectors in a dynamic VHD file.
//! Each entry is a 4-byte sector offset pointing at the block's sector
//! bitmap; the block data follows the bitmap.

use super::header::VhdDynamicHeader;
use super::types::{be_u32, VhdType};
use std::fs::File;
use std::ops::Range;
use vhdflat_core::security::{checked_multiply_u64, validate_allocation_size, MAX_ALLOCATION_SIZE};
use vhdflat_core::{Error, Result, SECTOR_SIZE};
use vhdflat_pipeline::read_vec_at;

/// BAT entry marking a block that is not present in this file
pub const UNUSED_ENTRY: u32 = 0xFFFF_FFFF;

/// Block Allocation Table for dynamic VHDs
#[derive(Debug, Clone)]
pub struct BlockAllocationTable {
    pub entries: Vec<u32>,
    pub block_size: u32,
}

impl BlockAllocationTable {
    /// Parse BAT from raw bytes
    pub fn parse(bytes: &[u8], block_size: u32) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(Error::format("BAT size must be multiple of 4"));
        }

        let entries = bytes.chunks_exact(4).map(|e| be_u32(e, 0)).collect();

        Ok(Self {
            entries,
            block_size,
        })
    }

    /// Read the table described by `header` from `file`
    pub fn read(file: &File, header: &VhdDynamicHeader) -> Result<Self> {
        let bat_size = checked_multiply_u64(header.max_table_entries as u64, 4, "BAT size")?;
        let bat_size = validate_allocation_size(bat_size, MAX_ALLOCATION_SIZE, "BAT")?;
        let bytes = read_vec_at(file, header.table_offset, bat_size, "block allocation table")?;
        Self::parse(&bytes, header.block_size)
    }

    /// Number of entries (maxTableEntries)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the per-block sector bitmap in bytes
    pub fn bitmap_size(&self) -> u64 {
        (self.block_size as u64 / SECTOR_SIZE).div_ceil(8)
    }

    /// Size of the per-block sector bitmap in whole sectors
    pub fn bitmap_sectors(&self) -> u64 {
        self.bitmap_size().div_ceil(SECTOR_SIZE)
    }

    /// Whether block `index` is present in this file
    pub fn is_present(&self, index: usize) -> bool {
        matches!(self.entries.get(index), Some(&entry) if entry != UNUSED_ENTRY)
    }

    /// Byte offset of the sector bitmap of block `index`
    ///
    /// Returns None if the block is not allocated (sparse)
    pub fn bitmap_offset(&self, index: usize) -> Option<u64> {
        match self.entries.get(index) {
            Some(&entry) if entry != UNUSED_ENTRY => Some(entry as u64 * SECTOR_SIZE),
            _ => None,
        }
    }

    /// Byte offset of the data of block `index`, past its bitmap
    pub fn data_offset(&self, index: usize) -> Option<u64> {
        self.entries
            .get(index)
            .filter(|&&entry| entry != UNUSED_ENTRY)
            .map(|&entry| (entry as u64 + self.bitmap_sectors()) * SECTOR_SIZE)
    }

    /// Calculate the block index for a virtual offset
    pub fn offset_to_block(&self, offset: u64) -> usize {
        (offset / self.block_size as u64) as usize
    }

    /// Calculate the offset within a block
    pub fn offset_within_block(&self, offset: u64) -> u64 {
        offset % self.block_size as u64
    }

    /// Sorted indices of the blocks present in this file
    pub fn indices(&self) -> Vec<u32> {
        (0..self.entries.len())
            .filter(|&i| self.is_present(i))
            .map(|i| i as u32)
            .collect()
    }

    /// Physical offset of logical byte `raw`, if its block is present
    pub fn dyn_vhd_offset(&self, raw: u64) -> Option<u64> {
        self.data_offset(self.offset_to_block(raw))
            .map(|data| data + self.offset_within_block(raw))
    }

    /// Physical byte range holding the data of block `index`
    pub fn range_from_block_index(&self, index: usize) -> Option<Range<u64>> {
        self.data_offset(index)
            .map(|start| start..start + self.block_size as u64)
    }
}

/// Which blocks hold data anywhere in a differencing chain
///
/// `None` fields mean coverage is unknown at this level; readers must then
/// ask the parent for every block the file itself does not hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainCoverage {
    /// Sorted union of the present blocks of this file and all ancestors
    pub full_indices: Option<Vec<u32>>,
    /// Per-entry flag: the block is present somewhere up the chain
    pub in_parent: Option<Vec<bool>>,
}

/// What a child knows about its immediate parent when computing coverage
#[derive(Debug, Clone, Copy)]
pub enum ParentCoverage<'a> {
    /// Not a differencing disk
    None,
    /// A fixed parent holds every block
    Fixed,
    /// A sparse parent with its own (possibly unknown) coverage
    Sparse(Option<&'a [u32]>),
}

impl ChainCoverage {
    /// Combine this file's present `indices` with its parent's coverage
    pub fn compute(indices: &[u32], table_len: usize, parent: ParentCoverage<'_>) -> Self {
        match parent {
            ParentCoverage::None => Self {
                full_indices: Some(indices.to_vec()),
                in_parent: None,
            },
            ParentCoverage::Fixed | ParentCoverage::Sparse(None) => Self::default(),
            ParentCoverage::Sparse(Some(parent_full)) => {
                let span = parent_full
                    .last()
                    .map_or(table_len, |&last| table_len.max(last as usize + 1));
                let mut in_parent = vec![false; span];
                for &i in parent_full {
                    if let Some(flag) = in_parent.get_mut(i as usize) {
                        *flag = true;
                    }
                }

                let mut full: Vec<u32> = indices.iter().chain(parent_full).copied().collect();
                full.sort_unstable();
                full.dedup();

                Self {
                    full_indices: Some(full),
                    in_parent: Some(in_parent),
                }
            }
        }
    }

    /// Whether block `index` may hold data in the parent chain
    ///
    /// Unknown coverage answers true.
    pub fn may_be_in_parent(&self, index: usize) -> bool {
        match &self.in_parent {
            Some(flags) => flags.get(index).copied().unwrap_or(false),
            None => true,
        }
    }

    /// Parent coverage as seen by a child of a disk of type `disk_type`
    pub fn as_parent(&self, disk_type: VhdType) -> ParentCoverage<'_> {
        match disk_type {
            VhdType::Fixed => ParentCoverage::Fixed,
            _ => ParentCoverage::Sparse(self.full_indices.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bat_parse() {
        // Create a simple BAT with 3 entries
        let mut bytes = vec![0u8; 12];
        bytes[0..4].copy_from_slice(&0x00001000u32.to_be_bytes());
        bytes[4..8].copy_from_slice(&0xFFFFFFFFu32.to_be_bytes());
        bytes[8..12].copy_from_slice(&0x00002000u32.to_be_bytes());

        let bat = BlockAllocationTable::parse(&bytes, 2 * 1024 * 1024).unwrap();

        assert_eq!(bat.len(), 3);
        assert_eq!(bat.bitmap_offset(0), Some(0x1000 * 512));
        assert_eq!(bat.bitmap_offset(1), None); // Sparse
        assert_eq!(bat.bitmap_offset(3), None);
        assert_eq!(bat.indices(), vec![0, 2]);
    }

    #[test]
    fn test_bat_parse_bad_length() {
        assert!(BlockAllocationTable::parse(&[0u8; 6], 4096).is_err());
    }

    #[test]
    fn test_bitmap_size() {
        let bat = BlockAllocationTable {
            entries: vec![],
            block_size: 2 * 1024 * 1024,
        };
        // 4096 sectors, one bit each
        assert_eq!(bat.bitmap_size(), 512);
        assert_eq!(bat.bitmap_sectors(), 1);

        let small = BlockAllocationTable {
            entries: vec![],
            block_size: 4096,
        };
        assert_eq!(small.bitmap_size(), 1);
        assert_eq!(small.bitmap_sectors(), 1);

        let big = BlockAllocationTable {
            entries: vec![],
            block_size: 8 * 1024 * 1024,
        };
        assert_eq!(big.bitmap_size(), 2048);
        assert_eq!(big.bitmap_sectors(), 4);
    }

    #[test]
    fn test_bat_offset_calculations() {
        let bat = BlockAllocationTable {
            entries: vec![0x1000, 0x2000],
            block_size: 2 * 1024 * 1024, // 2 MB
        };

        assert_eq!(bat.offset_to_block(0), 0);
        assert_eq!(bat.offset_to_block(1024), 0);
        assert_eq!(bat.offset_to_block(2 * 1024 * 1024), 1);
        assert_eq!(bat.offset_to_block(2 * 1024 * 1024 + 500), 1);

        assert_eq!(bat.offset_within_block(0), 0);
        assert_eq!(bat.offset_within_block(1024), 1024);
        assert_eq!(bat.offset_within_block(2 * 1024 * 1024 + 500), 500);
    }

    #[test]
    fn test_dyn_vhd_offset_mapping() {
        let bat = BlockAllocationTable {
            entries: vec![3, UNUSED_ENTRY, 12],
            block_size: 4096,
        };

        // Data starts one bitmap sector past the entry
        assert_eq!(bat.data_offset(0), Some(4 * 512));
        assert_eq!(bat.data_offset(2), Some(13 * 512));

        for o in [0u64, 1, 511, 512, 4095] {
            assert_eq!(bat.dyn_vhd_offset(o), Some(4 * 512 + o));
        }
        for o in [8192u64, 8192 + 700, 12287] {
            assert_eq!(bat.dyn_vhd_offset(o), Some(13 * 512 + (o % 4096)));
        }
        assert_eq!(bat.dyn_vhd_offset(4096), None);
        assert_eq!(bat.dyn_vhd_offset(12288), None);

        assert_eq!(bat.range_from_block_index(2), Some(6656..6656 + 4096));
        assert_eq!(bat.range_from_block_index(1), None);
    }

    #[test]
    fn test_coverage_dynamic() {
        let cov = ChainCoverage::compute(&[0, 2], 4, ParentCoverage::None);
        assert_eq!(cov.full_indices, Some(vec![0, 2]));
        assert_eq!(cov.in_parent, None);
    }

    #[test]
    fn test_coverage_fixed_parent() {
        let cov = ChainCoverage::compute(&[1], 4, ParentCoverage::Fixed);
        assert_eq!(cov, ChainCoverage::default());
        assert!(cov.may_be_in_parent(3));
    }

    #[test]
    fn test_coverage_three_level_chain() {
        let a = ChainCoverage::compute(&[0, 2], 4, ParentCoverage::None);
        let b = ChainCoverage::compute(&[1], 4, a.as_parent(VhdType::Dynamic));
        let c = ChainCoverage::compute(&[2], 4, b.as_parent(VhdType::Differencing));

        assert_eq!(b.full_indices, Some(vec![0, 1, 2]));
        assert_eq!(c.full_indices, Some(vec![0, 1, 2]));
        assert!(c.may_be_in_parent(0));
        assert!(c.may_be_in_parent(1));
        assert!(c.may_be_in_parent(2));
        assert!(!c.may_be_in_parent(3));
    }

    #[test]
    fn test_coverage_unknown_propagates() {
        let b = ChainCoverage::compute(&[1], 4, ParentCoverage::Fixed);
        let c = ChainCoverage::compute(&[2], 4, b.as_parent(VhdType::Differencing));
        assert_eq!(c.full_indices, None);
        assert!(c.may_be_in_parent(3));
    }
}
