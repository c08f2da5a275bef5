//! Core traits for vhdflat

use crate::error::Result;

/// Forward-only producer of byte chunks
///
/// Each item is one chunk of data; `None` marks the end of the stream and
/// an `Err` item ends it early. Chunks may have any length, including
/// lengths that do not line up with sector boundaries.
pub trait ChunkSource: Iterator<Item = Result<Vec<u8>>> + Send {}

/// Blanket implementation for any iterator of byte chunks
impl<T: Iterator<Item = Result<Vec<u8>>> + Send> ChunkSource for T {}
