//! # vhdflat VHD
//!
//! Read-only access to Microsoft VHD images and differencing chains.
//!
//! This crate parses VHD metadata and streams the flattened disk:
//! - **VhdInfo**: an opened image with its footer, dynamic header, BAT and parent chain
//! - **VhdReadStream**: the flattened contents of a range, followed by a fixed-disk footer
//! - **SectorMerge**: sector-level interleaving of a differencing block with its parent
//! - **VhdConfig**: creator tag, checksum policy and default chunk size
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::io::Read;
//! use vhdflat_core::ReadOptions;
//!
//! let disk = vhdflat_vhd::open("child.vhd").unwrap();
//! println!("Type: {}", disk.identify());
//! println!("Chain depth: {}", disk.chain_depth());
//!
//! // Flatten the whole chain into a fixed-format image
//! let mut stream = disk.read_stream(ReadOptions::new()).unwrap();
//! let mut flat = Vec::new();
//! stream.read_to_end(&mut flat).unwrap();
//! assert_eq!(flat.len() as u64, disk.flattened_length());
//! ```

pub mod config;
pub mod vhd;

pub use config::{VhdConfig, DEFAULT_CREATOR_APPLICATION};
pub use vhd::bat::{BlockAllocationTable, ChainCoverage};
pub use vhd::footer::VhdFooter;
pub use vhd::header::{ParentLocator, VhdDynamicHeader};
pub use vhd::merge::SectorMerge;
pub use vhd::stream::VhdReadStream;
pub use vhd::summary::{ChainSummary, ImageSummary};
pub use vhd::types::{DiskGeometry, VhdType};
pub use vhd::VhdInfo;

use std::path::Path;
use vhdflat_core::Result;

/// Open the VHD at `path` with the default configuration
pub fn open(path: impl AsRef<Path>) -> Result<VhdInfo> {
    VhdInfo::open(path, VhdConfig::default())
}
