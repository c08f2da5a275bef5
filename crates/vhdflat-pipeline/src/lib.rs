//! # vhdflat Pipeline
//!
//! Byte-range I/O building blocks for the VHD reader.
//!
//! This crate provides the plain sub-streams a flattened disk is assembled from:
//! - **PartialPipeline**: a read window over a subset of a stream
//! - **FileRange**: a chunked stream over a byte range of a file
//! - **ZeroFill**: a chunked stream of zero bytes
//! - **positioned**: fixed-size reads at absolute file offsets
//!
//! ## Example
//!
//! ```rust,no_run
//! use vhdflat_pipeline::{read_vec_at, FileRange};
//! use std::fs::File;
//!
//! let file = File::open("disk.vhd").unwrap();
//!
//! // The 512-byte footer copy at the start of a dynamic disk
//! let footer = read_vec_at(&file, 0, 512, "footer").unwrap();
//!
//! // Stream one 2 MB block in 64 KB chunks
//! for chunk in FileRange::new(&file, 0x600, 2 * 1024 * 1024, 64 * 1024) {
//!     let chunk = chunk.unwrap();
//!     // Process chunk...
//! }
//! ```

pub mod partial;
pub mod positioned;
pub mod range;

pub use partial::PartialPipeline;
pub use positioned::{read_exact_at, read_vec_at};
pub use range::{FileRange, ZeroFill};
