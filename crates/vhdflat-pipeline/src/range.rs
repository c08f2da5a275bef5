//! Chunked streams over a byte range: file-backed and zero-filled

use crate::partial::PartialPipeline;
use std::fs::File;
use std::io::Read;
use vhdflat_core::{Error, Result, DEFAULT_BUFFER_SIZE};

/// Streams `start..start + length` of a file as chunks of at most
/// `buffer_size` bytes.
///
/// The file handle is borrowed; the range re-seeks before each read so it
/// may share the handle with positioned metadata reads.
pub struct FileRange<'a> {
    pipeline: PartialPipeline<&'a File>,
    buffer_size: usize,
    done: bool,
}

impl<'a> FileRange<'a> {
    /// Stream `length` bytes starting at absolute offset `start`
    pub fn new(file: &'a File, start: u64, length: u64, buffer_size: usize) -> Self {
        Self {
            pipeline: PartialPipeline::new(file, start, length),
            buffer_size: if buffer_size == 0 {
                DEFAULT_BUFFER_SIZE
            } else {
                buffer_size
            },
            done: false,
        }
    }

    /// Bytes not yet emitted
    pub fn remaining(&self) -> u64 {
        self.pipeline.remaining()
    }
}

impl Iterator for FileRange<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pipeline.remaining() == 0 {
            return None;
        }

        let want = (self.buffer_size as u64).min(self.pipeline.remaining()) as usize;
        let mut chunk = vec![0u8; want];
        let mut filled = 0;

        while filled < want {
            match self.pipeline.read(&mut chunk[filled..]) {
                Ok(0) => {
                    self.done = true;
                    return Some(Err(Error::format(format!(
                        "File ended {} bytes before the end of range {}..{}",
                        self.pipeline.remaining(),
                        self.pipeline.start(),
                        self.pipeline.start() + self.pipeline.length()
                    ))));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::Io(e)));
                }
            }
        }

        Some(Ok(chunk))
    }
}

/// Streams `length` zero bytes in chunks of at most `buffer_size` bytes
#[derive(Debug, Clone)]
pub struct ZeroFill {
    remaining: u64,
    buffer_size: usize,
}

impl ZeroFill {
    pub fn new(length: u64, buffer_size: usize) -> Self {
        Self {
            remaining: length,
            buffer_size: if buffer_size == 0 {
                DEFAULT_BUFFER_SIZE
            } else {
                buffer_size
            },
        }
    }

    /// Zero bytes not yet emitted
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for ZeroFill {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let n = (self.buffer_size as u64).min(self.remaining) as usize;
        self.remaining -= n as u64;
        Some(Ok(vec![0u8; n]))
    }
}
