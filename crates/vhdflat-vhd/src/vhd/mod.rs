//! VHD (Virtual Hard Disk) chain reader
//!
//! This module opens Microsoft VHD images and exposes their flattened
//! contents as a stream.
//!
//! ## Supported Formats
//!
//! - **Fixed VHD**: data stored contiguously with a footer at the end
//! - **Dynamic VHD**: sparse format using a Block Allocation Table (BAT)
//! - **Differencing VHD**: sparse copy-on-write layer over a parent image
//!
//! ## Format Overview
//!
//! Every VHD ends with a 512-byte footer. Dynamic and differencing images
//! add a dynamic header and a BAT; each allocated block starts with a
//! sector bitmap. A differencing image names its parent by unique ID and
//! path locators, and is read through the whole chain down to a fixed or
//! dynamic base.

pub mod bat;
pub mod footer;
pub mod header;
pub mod merge;
pub mod parent;
pub mod stream;
pub mod summary;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

use crate::config::VhdConfig;
use bat::{BlockAllocationTable, ChainCoverage, ParentCoverage};
use footer::VhdFooter;
use header::VhdDynamicHeader;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use stream::VhdReadStream;
use summary::ChainSummary;
use tracing::{debug, warn};
use types::VhdType;
use vhdflat_core::security::validate_chain_depth;
use vhdflat_core::{Error, ParentAttempt, ReadOptions, Result, SECTOR_SIZE};
use vhdflat_pipeline::read_exact_at;

/// Dynamic header and BAT of a sparse image
#[derive(Debug)]
struct SparseLayout {
    header: VhdDynamicHeader,
    bat: BlockAllocationTable,
    indices: Vec<u32>,
    dyn_vhd_offsets: Vec<u64>,
    coverage: ChainCoverage,
}

/// An opened VHD image and, for differencing disks, its parent chain
///
/// Holds one open file per level; dropping the top closes the chain.
#[derive(Debug)]
pub struct VhdInfo {
    path: PathBuf,
    file: File,
    config: VhdConfig,
    footer: VhdFooter,
    flattened_footer: VhdFooter,
    sparse: Option<SparseLayout>,
    parent: Option<Box<VhdInfo>>,
    parent_attempts: Vec<ParentAttempt>,
}

impl VhdInfo {
    /// Open a VHD image from a file path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened
    /// - The footer, dynamic header or BAT is invalid
    /// - A checksum does not match and `config.verify_checksums` is set
    /// - The parent of a differencing disk cannot be found
    pub fn open(path: impl AsRef<Path>, config: VhdConfig) -> Result<Self> {
        // Open top-down, then link bottom-up
        let mut levels: Vec<VhdInfo> = Vec::new();
        let mut next = Some(path.as_ref().to_path_buf());

        while let Some(path) = next.take() {
            let depth = levels.len();
            validate_chain_depth(depth)?;

            let mut level = Self::open_level(&path, &config, depth)?;
            if let Some(header) = level.header().filter(|_| level.is_diff()) {
                let (parent_path, attempts) = parent::resolve_parent(&level.path, header)?;
                level.parent_attempts = attempts;
                next = Some(parent_path);
            }
            levels.push(level);
        }

        let mut chain = levels
            .pop()
            .ok_or_else(|| Error::format("Empty VHD chain"))?;
        while let Some(mut child) = levels.pop() {
            child.attach_parent(chain);
            chain = child;
        }
        Ok(chain)
    }

    /// Open a single image; a differencing disk is left without its parent
    fn open_level(path: &Path, config: &VhdConfig, depth: usize) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        if file_len < VhdFooter::SIZE as u64 {
            return Err(Error::format("File too small to be a VHD"));
        }

        // Read footer from last 512 bytes
        let mut footer_bytes = [0u8; VhdFooter::SIZE];
        read_exact_at(
            &file,
            file_len - VhdFooter::SIZE as u64,
            &mut footer_bytes,
            "footer",
        )?;
        let footer = VhdFooter::parse(&footer_bytes)?;
        check_checksum(config, footer.verify_checksum(), "footer", path)?;

        let mut flattened_footer = footer.clone();
        flattened_footer.convert_to_fixed(config.creator_application.as_ref());

        let mut info = Self {
            path: path.to_path_buf(),
            file,
            config: config.clone(),
            footer,
            flattened_footer,
            sparse: None,
            parent: None,
            parent_attempts: Vec::new(),
        };

        match info.footer.disk_type {
            VhdType::Fixed => {
                let needed = info.footer.flattened_length();
                if file_len < needed {
                    return Err(Error::format(format!(
                        "Fixed VHD is {} bytes, expected at least {}",
                        file_len, needed
                    )));
                }
            }
            VhdType::Dynamic | VhdType::Differencing => info.open_sparse()?,
            other => {
                return Err(Error::unsupported(format!(
                    "VHD disk type {} ({})",
                    other as u32,
                    other.name()
                )))
            }
        }

        debug!(
            path = %info.path.display(),
            disk_type = info.footer.disk_type.name(),
            current_size = info.footer.current_size,
            depth,
            "opened VHD"
        );
        Ok(info)
    }

    fn open_sparse(&mut self) -> Result<()> {
        let data_offset = self
            .footer
            .data_offset
            .ok_or_else(|| Error::format("Dynamic VHD has no dynamic header offset"))?;

        let mut header_bytes = [0u8; VhdDynamicHeader::SIZE];
        read_exact_at(&self.file, data_offset, &mut header_bytes, "dynamic header")?;
        let mut header = VhdDynamicHeader::parse(&header_bytes)?;
        check_checksum(
            &self.config,
            header.verify_checksum(),
            "dynamic header",
            &self.path,
        )?;
        if self.is_diff() {
            header.load_locators(&self.file)?;
        }

        let bat = BlockAllocationTable::read(&self.file, &header)?;
        let indices = bat.indices();
        let dyn_vhd_offsets = indices
            .iter()
            .filter_map(|&i| bat.data_offset(i as usize))
            .collect();

        // Differencing coverage is recomputed once the parent is attached
        let coverage = ChainCoverage::compute(&indices, bat.len(), ParentCoverage::None);

        self.sparse = Some(SparseLayout {
            header,
            bat,
            indices,
            dyn_vhd_offsets,
            coverage,
        });
        Ok(())
    }

    /// Link the opened `parent` below this differencing disk
    fn attach_parent(&mut self, parent: VhdInfo) {
        if let Some(sparse) = self.sparse.as_mut() {
            sparse.coverage = ChainCoverage::compute(
                &sparse.indices,
                sparse.bat.len(),
                parent.coverage_for_child(),
            );
        }
        self.parent = Some(Box::new(parent));
    }

    fn coverage_for_child(&self) -> ParentCoverage<'_> {
        match &self.sparse {
            Some(sparse) => sparse.coverage.as_parent(self.footer.disk_type),
            None => ParentCoverage::Fixed,
        }
    }

    /// Human-readable description of the image type
    pub fn identify(&self) -> &str {
        match self.footer.disk_type {
            VhdType::Fixed => "Microsoft VHD (Fixed)",
            VhdType::Dynamic => "Microsoft VHD (Dynamic)",
            VhdType::Differencing => "Microsoft VHD (Differencing)",
            _ => "Microsoft VHD",
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &VhdConfig {
        &self.config
    }

    /// The footer as found on disk
    pub fn footer(&self) -> &VhdFooter {
        &self.footer
    }

    /// The footer appended to the flattened stream
    pub fn flattened_footer(&self) -> &VhdFooter {
        &self.flattened_footer
    }

    /// Get the dynamic header (if this is a dynamic/differencing VHD)
    pub fn header(&self) -> Option<&VhdDynamicHeader> {
        self.sparse.as_ref().map(|s| &s.header)
    }

    /// Get the block allocation table (if this is a dynamic/differencing VHD)
    pub fn bat(&self) -> Option<&BlockAllocationTable> {
        self.sparse.as_ref().map(|s| &s.bat)
    }

    /// Sorted indices of the blocks present in this file
    pub fn indices(&self) -> &[u32] {
        self.sparse.as_ref().map_or(&[], |s| &s.indices)
    }

    /// Data offsets of the blocks in [`indices`](Self::indices)
    pub fn dyn_vhd_offsets(&self) -> &[u64] {
        self.sparse.as_ref().map_or(&[], |s| &s.dyn_vhd_offsets)
    }

    /// Blocks present anywhere in the chain; `None` when unknown
    pub fn full_indices(&self) -> Option<&[u32]> {
        self.sparse
            .as_ref()
            .and_then(|s| s.coverage.full_indices.as_deref())
    }

    /// Chain coverage of this level (sparse images only)
    pub fn coverage(&self) -> Option<&ChainCoverage> {
        self.sparse.as_ref().map(|s| &s.coverage)
    }

    pub fn is_diff(&self) -> bool {
        self.footer.disk_type == VhdType::Differencing
    }

    /// Check if this is a dynamic or differencing VHD
    pub fn is_dynamic(&self) -> bool {
        self.footer.disk_type.is_sparse()
    }

    /// The resolved parent of a differencing disk
    pub fn parent(&self) -> Option<&VhdInfo> {
        self.parent.as_deref()
    }

    /// Every parent candidate tried while opening this disk
    pub fn parent_attempts(&self) -> &[ParentAttempt] {
        &self.parent_attempts
    }

    /// Number of images in the chain, this one included
    pub fn chain_depth(&self) -> usize {
        std::iter::successors(Some(self), |level| level.parent()).count()
    }

    /// Serializable metadata of this image and its ancestors
    pub fn summary(&self) -> ChainSummary {
        ChainSummary::of(self)
    }

    /// Virtual disk size in bytes
    pub fn length(&self) -> u64 {
        self.footer.current_size
    }

    /// Length of the full flattened stream, footer included
    pub fn flattened_length(&self) -> u64 {
        self.footer.flattened_length()
    }

    /// Physical offset in this file of logical byte `raw`
    ///
    /// `None` when the byte's block is not stored in this file.
    pub fn dyn_vhd_offset(&self, raw: u64) -> Option<u64> {
        match &self.sparse {
            Some(sparse) => sparse.bat.dyn_vhd_offset(raw),
            None => (raw < self.footer.current_size).then_some(raw),
        }
    }

    /// Physical byte range of the data of block `index`
    pub fn dyn_vhd_range_from_block_index(&self, index: usize) -> Option<Range<u64>> {
        self.sparse
            .as_ref()
            .and_then(|s| s.bat.range_from_block_index(index))
    }

    /// Stream the flattened disk, or the inclusive byte range in `options`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Alignment`] if a given `start` or `end + 1` is not a
    /// multiple of the sector size.
    pub fn read_stream(&self, options: ReadOptions) -> Result<VhdReadStream<'_>> {
        let total = self.flattened_length();
        let misaligned_start = options.start.is_some_and(|s| s % SECTOR_SIZE != 0);
        let misaligned_end = options
            .end
            .is_some_and(|e| e % SECTOR_SIZE != SECTOR_SIZE - 1);
        if misaligned_start || misaligned_end {
            return Err(Error::Alignment {
                start: options.start.unwrap_or(0),
                end: options.end.unwrap_or(total - 1),
                sector_size: SECTOR_SIZE,
            });
        }

        let start = options.start.unwrap_or(0);
        let end = options.end.map_or(total, |e| e.saturating_add(1).min(total));
        let buffer_size = options.buffer_size.unwrap_or(self.config.buffer_size);

        debug!(
            path = %self.path.display(),
            start,
            end,
            buffer_size,
            "read stream"
        );
        Ok(VhdReadStream::new(self, start, end, buffer_size))
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }
}

fn check_checksum(config: &VhdConfig, valid: bool, what: &str, path: &Path) -> Result<()> {
    if valid {
        return Ok(());
    }
    if config.verify_checksums {
        return Err(Error::checksum(format!(
            "VHD {} checksum mismatch in '{}'",
            what,
            path.display()
        )));
    }
    warn!(path = %path.display(), what, "ignoring VHD checksum mismatch");
    Ok(())
}
