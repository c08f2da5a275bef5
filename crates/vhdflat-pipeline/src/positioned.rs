//! Positioned reads of fixed-size metadata

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use vhdflat_core::{Error, Result};

/// Fill `buf` from `offset` of `file`
///
/// A file that ends before `buf` is full is reported as a format error
/// naming `what`, since fixed-size metadata must always be present.
pub fn read_exact_at(mut file: &File, offset: u64, buf: &mut [u8], what: &str) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::format(format!(
                "Short read of {} ({} bytes at offset {})",
                what,
                buf.len(),
                offset
            ))
        } else {
            Error::Io(e)
        }
    })
}

/// Read `len` bytes at `offset` into a new buffer
pub fn read_vec_at(file: &File, offset: u64, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact_at(file, offset, &mut buf, what)?;
    Ok(buf)
}
