//! Error types for VHD resolution and streaming

use crate::types::ParentAttempt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for vhdflat operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while reading an image
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic, bad version, or short/corrupt metadata
    #[error("Invalid VHD format: {0}")]
    Format(String),

    /// No parent candidate of a differencing disk resolved and matched
    #[error(
        "Parent of '{}' not found; tried: {}",
        .child.display(),
        describe_attempts(.attempts)
    )]
    ParentNotFound {
        child: PathBuf,
        attempts: Vec<ParentAttempt>,
    },

    /// Requested range does not start and end on sector boundaries
    #[error("Range {start}..={end} is not aligned to {sector_size}-byte sectors")]
    Alignment { start: u64, end: u64, sector_size: u64 },

    /// 64-bit field not exactly representable, or misplaced all-ones sentinel
    #[error("Precision error: {0}")]
    Precision(String),

    /// Two merged sources (or a chain) ended with inconsistent lengths
    #[error(
        "Size mismatch: {} and {} bytes left over after {} and {} bytes received",
        .remaining[0],
        .remaining[1],
        .consumed[0],
        .consumed[1]
    )]
    SizeMismatch {
        remaining: [usize; 2],
        consumed: [u64; 2],
    },

    /// Checksum verification failed
    #[error("Checksum verification failed: {0}")]
    Checksum(String),

    /// Unsupported disk type or feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A size or count read from the image exceeds a safety limit
    #[error("Limit exceeded: {0}")]
    Limit(String),

    /// The stream already failed or was destroyed
    #[error("Stream is unreadable: {0}")]
    Unreadable(String),
}

/// Result type alias for vhdflat operations
pub type Result<T> = std::result::Result<T, Error>;

fn describe_attempts(attempts: &[ParentAttempt]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// Create a precision error
    pub fn precision(msg: impl Into<String>) -> Self {
        Error::Precision(msg.into())
    }

    /// Create a checksum error
    pub fn checksum(msg: impl Into<String>) -> Self {
        Error::Checksum(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create a limit error
    pub fn limit(msg: impl Into<String>) -> Self {
        Error::Limit(msg.into())
    }

    /// Create an unreadable-stream error
    pub fn unreadable(msg: impl Into<String>) -> Self {
        Error::Unreadable(msg.into())
    }

    /// Convert into an `std::io::Error`, unwrapping `Io` unchanged
    pub fn into_io(self) -> std::io::Error {
        match self {
            Error::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
