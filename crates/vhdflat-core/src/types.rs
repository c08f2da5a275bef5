//! Core types shared by the vhdflat crates

use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Sector size in bytes; the alignment and bitmap granularity
pub const SECTOR_SIZE: u64 = 512;

/// Default chunk size for streamed reads (64 KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Byte range and chunking options for a read stream
///
/// `end` is inclusive. Both `start` and `end + 1` must be multiples of
/// [`SECTOR_SIZE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// First logical byte to emit (default 0)
    pub start: Option<u64>,
    /// Last logical byte to emit, inclusive (default: end of the footer)
    pub end: Option<u64>,
    /// Preferred chunk size for file reads and zero-fill
    pub buffer_size: Option<usize>,
}

impl ReadOptions {
    /// Options covering a whole stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the inclusive byte range `start..=end`
    pub fn range(start: u64, end: u64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            buffer_size: None,
        }
    }

    /// Set the preferred chunk size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }
}

/// Result of trying one parent candidate path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Nothing exists at the path
    Missing,
    /// A file exists but could not be opened as a VHD
    Unreadable(String),
    /// A VHD exists but its unique ID is not the expected one
    UuidMismatch(Uuid),
    /// The candidate matched and became the parent
    Accepted,
}

/// One parent candidate and what happened when it was tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentAttempt {
    pub path: PathBuf,
    pub outcome: AttemptOutcome,
}

impl ParentAttempt {
    pub fn new(path: impl AsRef<Path>, outcome: AttemptOutcome) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            outcome,
        }
    }
}

impl fmt::Display for ParentAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.display();
        match &self.outcome {
            AttemptOutcome::Missing => write!(f, "{} (not found)", path),
            AttemptOutcome::Unreadable(reason) => write!(f, "{} (unreadable: {})", path, reason),
            AttemptOutcome::UuidMismatch(found) => {
                write!(f, "{} (unique ID mismatch: found {})", path, found)
            }
            AttemptOutcome::Accepted => write!(f, "{} (accepted)", path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_options_range() {
        let opts = ReadOptions::range(512, 1023).with_buffer_size(4096);
        assert_eq!(opts.start, Some(512));
        assert_eq!(opts.end, Some(1023));
        assert_eq!(opts.buffer_size, Some(4096));
        assert_eq!(ReadOptions::new(), ReadOptions::default());
    }

    #[test]
    fn test_attempt_display() {
        let a = ParentAttempt::new("/x/p.vhd", AttemptOutcome::Missing);
        assert_eq!(a.to_string(), "/x/p.vhd (not found)");

        let a = ParentAttempt::new("/x/p.vhd", AttemptOutcome::Unreadable("bad cookie".into()));
        assert!(a.to_string().contains("bad cookie"));
    }
}
