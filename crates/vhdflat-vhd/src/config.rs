//! Options for opening VHD images

use vhdflat_core::DEFAULT_BUFFER_SIZE;

/// Creator application stamped into the flattened footer by default
pub const DEFAULT_CREATOR_APPLICATION: [u8; 4] = *b"vhdf";

/// Configuration for opening a VHD chain
///
/// The same configuration is applied to every parent opened on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhdConfig {
    /// Creator tag written into the flattened footer; `None` keeps the original
    pub creator_application: Option<[u8; 4]>,
    /// Reject images whose footer or header checksum does not match
    pub verify_checksums: bool,
    /// Default chunk size for read streams
    pub buffer_size: usize,
}

impl Default for VhdConfig {
    fn default() -> Self {
        Self {
            creator_application: Some(DEFAULT_CREATOR_APPLICATION),
            verify_checksums: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl VhdConfig {
    pub fn with_creator_application(mut self, creator: Option<[u8; 4]>) -> Self {
        self.creator_application = creator;
        self
    }

    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}
