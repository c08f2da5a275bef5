//! VHD footer codec
//!
//! The 512-byte footer sits at the end of every VHD file; dynamic and
//! differencing disks keep a copy at offset 0 as well. The parsed fields
//! describe the image as found on disk. The raw bytes are kept alongside
//! so [`VhdFooter::convert_to_fixed`] can rewrite them into the footer of
//! the flattened, fixed-format view.

use super::types::{
    be_u32, ones_complement_checksum, read_offset, read_required, DiskGeometry, VhdType,
    NO_OFFSET,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;
use vhdflat_core::{Error, Result};

/// Seconds between the Unix epoch and the VHD epoch (2000-01-01T00:00:00Z)
pub const VHD_EPOCH_OFFSET: i64 = 946_684_800;

/// VHD Footer structure (512 bytes)
#[derive(Debug, Clone)]
pub struct VhdFooter {
    pub cookie: [u8; 8],
    pub features: u32,
    pub version: u32,
    /// Offset of the dynamic header; `None` for fixed disks
    pub data_offset: Option<u64>,
    pub timestamp: u32,
    pub creator_app: [u8; 4],
    pub creator_version: u32,
    pub creator_os: u32,
    pub original_size: u64,
    pub current_size: u64,
    pub geometry: DiskGeometry,
    pub disk_type: VhdType,
    /// Disk type of the flattened view; becomes `Fixed` after conversion
    pub converted_disk_type: VhdType,
    pub checksum: u32,
    pub unique_id: Uuid,
    pub saved_state: u8,
    raw: [u8; VhdFooter::SIZE],
}

impl VhdFooter {
    /// VHD footer cookie value "conectix"
    pub const COOKIE: &'static [u8; 8] = b"conectix";

    /// Size of the VHD footer in bytes
    pub const SIZE: usize = 512;

    /// The only file format version this reader understands
    pub const FORMAT_VERSION: u32 = 0x0001_0000;

    const CHECKSUM_OFFSET: usize = 64;

    /// Parse VHD footer from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::format("VHD footer too small"));
        }

        let mut raw = [0u8; Self::SIZE];
        raw.copy_from_slice(&bytes[..Self::SIZE]);

        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&raw[0..8]);
        if &cookie != Self::COOKIE {
            return Err(Error::format(format!(
                "Invalid VHD footer cookie: expected 'conectix', got '{}'",
                String::from_utf8_lossy(&cookie)
            )));
        }

        let version = be_u32(&raw, 12);
        if version != Self::FORMAT_VERSION {
            return Err(Error::format(format!(
                "Unsupported VHD file format version {:#010x}",
                version
            )));
        }

        let mut creator_app = [0u8; 4];
        creator_app.copy_from_slice(&raw[28..32]);

        let disk_type = VhdType::from_u32(be_u32(&raw, 60))?;

        let mut unique_id = [0u8; 16];
        unique_id.copy_from_slice(&raw[68..84]);

        Ok(Self {
            cookie,
            features: be_u32(&raw, 8),
            version,
            data_offset: read_offset(&raw, 16, "footer data offset")?,
            timestamp: be_u32(&raw, 24),
            creator_app,
            creator_version: be_u32(&raw, 32),
            creator_os: be_u32(&raw, 36),
            original_size: read_required(&raw, 40, "footer original size")?,
            current_size: read_required(&raw, 48, "footer current size")?,
            geometry: DiskGeometry::parse(&raw[56..60]),
            disk_type,
            converted_disk_type: disk_type,
            checksum: be_u32(&raw, 64),
            unique_id: Uuid::from_bytes(unique_id),
            saved_state: raw[84],
            raw,
        })
    }

    /// The 512 bytes of this footer, including any conversion
    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.raw
    }

    /// Checksum the raw bytes should carry
    pub fn compute_checksum(&self) -> u32 {
        ones_complement_checksum(&self.raw, Self::CHECKSUM_OFFSET)
    }

    /// Verify the stored checksum against the raw bytes
    pub fn verify_checksum(&self) -> bool {
        self.compute_checksum() == be_u32(&self.raw, Self::CHECKSUM_OFFSET)
    }

    /// Recompute the checksum and write it into the raw bytes
    pub fn checksum(&mut self) -> u32 {
        let checksum = self.compute_checksum();
        self.raw[Self::CHECKSUM_OFFSET..Self::CHECKSUM_OFFSET + 4]
            .copy_from_slice(&checksum.to_be_bytes());
        self.checksum = checksum;
        checksum
    }

    /// Rewrite this footer into the footer of a fixed disk
    ///
    /// The on-disk type becomes `Fixed`, the data offset the all-ones
    /// sentinel, and `creator` (if any) replaces the creator application.
    /// A footer that is already fixed is left untouched.
    pub fn convert_to_fixed(&mut self, creator: Option<&[u8; 4]>) {
        if self.converted_disk_type == VhdType::Fixed {
            return;
        }

        self.converted_disk_type = VhdType::Fixed;
        self.raw[60..64].copy_from_slice(&(VhdType::Fixed as u32).to_be_bytes());
        self.raw[16..24].copy_from_slice(&NO_OFFSET.to_be_bytes());
        if let Some(tag) = creator {
            self.raw[28..32].copy_from_slice(tag);
        }
        self.checksum();
    }

    /// Length of the flattened stream: the disk contents plus one footer
    pub fn flattened_length(&self) -> u64 {
        self.current_size + Self::SIZE as u64
    }

    /// Creation time recorded in the footer
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(VHD_EPOCH_OFFSET + self.timestamp as i64, 0)
    }

    /// Creator application tag as text
    pub fn creator_app_str(&self) -> String {
        String::from_utf8_lossy(&self.creator_app).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhd::testutil::footer_bytes;

    #[test]
    fn test_vhd_footer_parse() {
        let id = Uuid::from_u128(0x1234);
        let bytes = footer_bytes(VhdType::Dynamic, 8192, Some(512), id);
        let footer = VhdFooter::parse(&bytes).unwrap();

        assert_eq!(footer.disk_type, VhdType::Dynamic);
        assert_eq!(footer.converted_disk_type, VhdType::Dynamic);
        assert_eq!(footer.data_offset, Some(512));
        assert_eq!(footer.current_size, 8192);
        assert_eq!(footer.unique_id, id);
        assert_eq!(footer.creator_app_str(), "test");
        assert_eq!(footer.flattened_length(), 8192 + 512);
        assert!(footer.verify_checksum());
        assert_eq!(footer.as_bytes(), &bytes);
    }

    #[test]
    fn test_vhd_footer_fixed_has_no_data_offset() {
        let bytes = footer_bytes(VhdType::Fixed, 4096, None, Uuid::nil());
        let footer = VhdFooter::parse(&bytes).unwrap();
        assert_eq!(footer.data_offset, None);
    }

    #[test]
    fn test_vhd_footer_invalid_cookie() {
        let mut bytes = [0u8; 512];
        bytes[0..8].copy_from_slice(b"notvalid");
        assert!(matches!(VhdFooter::parse(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_vhd_footer_too_small() {
        let bytes = [0u8; 100];
        assert!(VhdFooter::parse(&bytes).is_err());
    }

    #[test]
    fn test_vhd_footer_bad_version() {
        let mut bytes = footer_bytes(VhdType::Fixed, 4096, None, Uuid::nil());
        bytes[12..16].copy_from_slice(&0x0002_0000u32.to_be_bytes());
        match VhdFooter::parse(&bytes) {
            Err(Error::Format(msg)) => assert!(msg.contains("version")),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_vhd_footer_current_size_precision() {
        let mut bytes = footer_bytes(VhdType::Fixed, 4096, None, Uuid::nil());
        bytes[48..56].copy_from_slice(&(1u64 << 53).to_be_bytes());
        assert!(matches!(VhdFooter::parse(&bytes), Err(Error::Precision(_))));

        bytes[48..56].copy_from_slice(&[0xFF; 8]);
        assert!(matches!(VhdFooter::parse(&bytes), Err(Error::Precision(_))));
    }

    #[test]
    fn test_vhd_footer_checksum_detects_corruption() {
        let mut bytes = footer_bytes(VhdType::Fixed, 4096, None, Uuid::nil());
        bytes[100] ^= 0xFF;
        let mut footer = VhdFooter::parse(&bytes).unwrap();
        assert!(!footer.verify_checksum());

        footer.checksum();
        assert!(footer.verify_checksum());
    }

    #[test]
    fn test_convert_to_fixed() {
        let bytes = footer_bytes(VhdType::Differencing, 8192, Some(512), Uuid::nil());
        let mut footer = VhdFooter::parse(&bytes).unwrap();

        footer.convert_to_fixed(Some(b"flat"));

        assert_eq!(footer.converted_disk_type, VhdType::Fixed);
        assert_eq!(footer.disk_type, VhdType::Differencing);

        let raw = footer.as_bytes();
        assert_eq!(&raw[60..64], &2u32.to_be_bytes());
        assert_eq!(&raw[16..24], &[0xFF; 8]);
        assert_eq!(&raw[28..32], b"flat");
        assert!(footer.verify_checksum());

        // The converted bytes parse as a fixed footer
        let reparsed = VhdFooter::parse(raw).unwrap();
        assert_eq!(reparsed.disk_type, VhdType::Fixed);
        assert_eq!(reparsed.data_offset, None);
        assert_eq!(reparsed.current_size, 8192);
    }

    #[test]
    fn test_convert_to_fixed_without_creator() {
        let bytes = footer_bytes(VhdType::Dynamic, 8192, Some(512), Uuid::nil());
        let mut footer = VhdFooter::parse(&bytes).unwrap();
        footer.convert_to_fixed(None);
        assert_eq!(&footer.as_bytes()[28..32], b"test");
        assert!(footer.verify_checksum());
    }

    #[test]
    fn test_convert_to_fixed_noop_for_fixed() {
        let bytes = footer_bytes(VhdType::Fixed, 4096, None, Uuid::nil());
        let mut footer = VhdFooter::parse(&bytes).unwrap();
        footer.convert_to_fixed(Some(b"flat"));
        assert_eq!(footer.as_bytes(), &bytes);
    }

    #[test]
    fn test_created_at() {
        let mut bytes = footer_bytes(VhdType::Fixed, 4096, None, Uuid::nil());
        bytes[24..28].copy_from_slice(&86_400u32.to_be_bytes());
        let footer = VhdFooter::parse(&bytes).unwrap();
        let created = footer.created_at().unwrap();
        assert_eq!(created.to_rfc3339(), "2000-01-02T00:00:00+00:00");
    }
}
