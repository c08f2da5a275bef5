//! # vhdflat Core
//!
//! Shared types, traits, and error handling for the vhdflat crates.
//!
//! This crate provides the foundations the VHD reader is built on:
//! - **Error**: the failure taxonomy for parsing, chain resolution and streaming
//! - **ChunkSource**: the forward-only chunk stream every sub-stream implements
//! - **ReadOptions**: sector-aligned range selection for read streams
//! - **security**: limits applied to untrusted sizes read from images
//!
//! ## Example
//!
//! ```rust
//! use vhdflat_core::{ChunkSource, Result};
//!
//! fn total_len(source: impl ChunkSource) -> Result<usize> {
//!     let mut total = 0;
//!     for chunk in source {
//!         total += chunk?.len();
//!     }
//!     Ok(total)
//! }
//!
//! let chunks: Vec<Result<Vec<u8>>> = vec![Ok(vec![0u8; 512]), Ok(vec![1u8; 512])];
//! assert_eq!(total_len(chunks.into_iter()).unwrap(), 1024);
//! ```

pub mod error;
pub mod security;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use error::{Error, Result};
pub use traits::ChunkSource;
pub use types::{AttemptOutcome, ParentAttempt, ReadOptions, DEFAULT_BUFFER_SIZE, SECTOR_SIZE};
