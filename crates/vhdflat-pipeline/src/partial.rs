//! Partial pipeline - a read window over a byte range of a stream

use std::io::{self, Read, Seek, SeekFrom};

/// A pipeline that reads only `start..start + length` of an underlying stream.
///
/// Every read re-seeks the inner stream, so several windows can share one
/// handle (e.g. `&File`) as long as they are read one at a time.
///
/// # Example
///
/// ```rust
/// use vhdflat_pipeline::PartialPipeline;
/// use std::io::{Cursor, Read};
///
/// let data: Vec<u8> = (0..=255).collect();
///
/// // Bytes 16..24 of the inner stream
/// let mut partial = PartialPipeline::new(Cursor::new(data), 16, 8);
/// let mut out = Vec::new();
/// partial.read_to_end(&mut out).unwrap();
/// assert_eq!(out, (16..24).collect::<Vec<u8>>());
/// ```
pub struct PartialPipeline<R: Read + Seek> {
    inner: R,
    start: u64,
    length: u64,
    position: u64,
}

impl<R: Read + Seek> PartialPipeline<R> {
    /// Create a window of `length` bytes beginning at `start`
    pub fn new(inner: R, start: u64, length: u64) -> Self {
        Self {
            inner,
            start,
            length,
            position: 0,
        }
    }

    /// Absolute offset of the window in the inner stream
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Length of the window
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Bytes already read from the window
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes left before the end of the window
    pub fn remaining(&self) -> u64 {
        self.length.saturating_sub(self.position)
    }
}

impl<R: Read + Seek> Read for PartialPipeline<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let to_read = (buf.len() as u64).min(remaining) as usize;

        self.inner
            .seek(SeekFrom::Start(self.start + self.position))?;
        let bytes_read = self.inner.read(&mut buf[..to_read])?;

        self.position += bytes_read as u64;
        Ok(bytes_read)
    }
}
