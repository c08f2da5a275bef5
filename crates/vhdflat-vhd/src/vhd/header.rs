//! VHD dynamic header codec
//!
//! The 1024-byte dynamic header follows the footer copy of every dynamic
//! and differencing disk. It locates the BAT, fixes the block size and, for
//! differencing disks, names the parent through a unique ID, a Unicode
//! name and up to eight platform-specific parent locators.

use super::types::{
    be_u16, be_u32, be_u64, ones_complement_checksum, read_offset, read_required,
};
use std::fs::File;
use uuid::Uuid;
use vhdflat_core::security::{
    u64_to_usize, validate_block_size, MAX_LOCATOR_DATA_LENGTH, MAX_SAFE_INTEGER,
};
use vhdflat_core::{Error, Result};
use vhdflat_pipeline::read_vec_at;

/// Platform code of a Windows relative path locator
pub const PLATFORM_W2RU: [u8; 4] = *b"W2ru";
/// Platform code of a Windows absolute path locator
pub const PLATFORM_W2KU: [u8; 4] = *b"W2ku";
/// Platform code of a Mac OS alias locator
pub const PLATFORM_MAC: [u8; 4] = *b"Mac ";
/// Platform code of a Mac OS X file URL locator
pub const PLATFORM_MACX: [u8; 4] = *b"MacX";

/// One of the eight parent locator entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLocator {
    pub platform_code: [u8; 4],
    /// Space reserved for the locator data, in sectors
    pub platform_data_space: u32,
    /// Length of the locator data in bytes
    pub platform_data_length: u32,
    pub platform_data_offset: u64,
    /// Decoded locator data, once loaded from the file
    pub text: Option<String>,
}

impl ParentLocator {
    /// Size of one locator entry in bytes
    pub const SIZE: usize = 24;

    fn parse(bytes: &[u8]) -> Self {
        let mut platform_code = [0u8; 4];
        platform_code.copy_from_slice(&bytes[0..4]);
        Self {
            platform_code,
            platform_data_space: be_u32(bytes, 4),
            platform_data_length: be_u32(bytes, 8),
            platform_data_offset: be_u64(bytes, 16),
            text: None,
        }
    }

    /// An unused slot: no platform code or no data
    pub fn is_empty(&self) -> bool {
        self.platform_code == [0u8; 4] || self.platform_data_length == 0
    }

    /// Platform code as text
    pub fn platform_code_str(&self) -> String {
        String::from_utf8_lossy(&self.platform_code).into_owned()
    }

    /// Read and decode this locator's data from `file`
    ///
    /// Windows locators hold UTF-16LE, Mac locators UTF-8; trailing NULs
    /// are dropped.
    pub fn load_text(&mut self, file: &File) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        if self.platform_data_length > MAX_LOCATOR_DATA_LENGTH {
            return Err(Error::limit(format!(
                "Parent locator '{}' data length {} exceeds limit {}",
                self.platform_code_str(),
                self.platform_data_length,
                MAX_LOCATOR_DATA_LENGTH
            )));
        }
        if self.platform_data_offset > MAX_SAFE_INTEGER {
            return Err(Error::precision(format!(
                "Parent locator data offset {:#x} exceeds 2^53 - 1",
                self.platform_data_offset
            )));
        }

        let len = u64_to_usize(u64::from(self.platform_data_length), "parent locator data")?;
        let data = read_vec_at(file, self.platform_data_offset, len, "parent locator data")?;

        let text = match self.platform_code {
            PLATFORM_W2RU | PLATFORM_W2KU => decode_utf16(&data, u16::from_le_bytes),
            _ => String::from_utf8_lossy(&data).into_owned(),
        };
        self.text = Some(text.trim_end_matches('\0').to_string());
        Ok(())
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// VHD Dynamic Header structure (1024 bytes)
#[derive(Debug, Clone)]
pub struct VhdDynamicHeader {
    pub cookie: [u8; 8],
    pub data_offset: Option<u64>,
    pub table_offset: u64,
    pub header_version: u32,
    pub max_table_entries: u32,
    pub block_size: u32,
    pub checksum: u32,
    /// Unique ID of the parent image (differencing disks)
    pub parent_unique_id: Uuid,
    pub parent_timestamp: u32,
    /// Parent file name, decoded up to the first NUL
    pub parent_unicode_name: String,
    pub parent_locators: Vec<ParentLocator>,
    raw: [u8; VhdDynamicHeader::SIZE],
}

impl VhdDynamicHeader {
    /// VHD dynamic header cookie value "cxsparse"
    pub const COOKIE: &'static [u8; 8] = b"cxsparse";

    /// Size of the VHD dynamic header in bytes
    pub const SIZE: usize = 1024;

    /// Number of parent locator slots
    pub const LOCATOR_COUNT: usize = 8;

    const CHECKSUM_OFFSET: usize = 36;
    const UNICODE_NAME_OFFSET: usize = 64;
    const UNICODE_NAME_SIZE: usize = 512;
    const LOCATOR_OFFSET: usize = 576;

    /// Parse VHD dynamic header from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::format("VHD dynamic header too small"));
        }

        let mut raw = [0u8; Self::SIZE];
        raw.copy_from_slice(&bytes[..Self::SIZE]);

        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&raw[0..8]);
        if &cookie != Self::COOKIE {
            return Err(Error::format(format!(
                "Invalid VHD dynamic header cookie: expected 'cxsparse', got '{}'",
                String::from_utf8_lossy(&cookie)
            )));
        }

        let block_size = be_u32(&raw, 32);
        validate_block_size(block_size)?;

        let mut parent_unique_id = [0u8; 16];
        parent_unique_id.copy_from_slice(&raw[40..56]);

        let name_bytes =
            &raw[Self::UNICODE_NAME_OFFSET..Self::UNICODE_NAME_OFFSET + Self::UNICODE_NAME_SIZE];
        let name_units: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        let parent_unicode_name = String::from_utf16_lossy(&name_units);

        let parent_locators = (0..Self::LOCATOR_COUNT)
            .map(|i| {
                let at = Self::LOCATOR_OFFSET + i * ParentLocator::SIZE;
                ParentLocator::parse(&raw[at..at + ParentLocator::SIZE])
            })
            .collect();

        Ok(Self {
            cookie,
            data_offset: read_offset(&raw, 8, "dynamic header data offset")?,
            table_offset: read_required(&raw, 16, "dynamic header table offset")?,
            header_version: be_u32(&raw, 24),
            max_table_entries: be_u32(&raw, 28),
            block_size,
            checksum: be_u32(&raw, 36),
            parent_unique_id: Uuid::from_bytes(parent_unique_id),
            parent_timestamp: be_u32(&raw, 56),
            parent_unicode_name,
            parent_locators,
            raw,
        })
    }

    /// Major half of the header version
    pub fn header_version_major(&self) -> u16 {
        be_u16(&self.raw, 24)
    }

    /// Minor half of the header version
    pub fn header_version_minor(&self) -> u16 {
        be_u16(&self.raw, 26)
    }

    /// Verify the dynamic header checksum
    pub fn verify_checksum(&self) -> bool {
        ones_complement_checksum(&self.raw, Self::CHECKSUM_OFFSET) == self.checksum
    }

    /// Locators that carry data
    pub fn active_locators(&self) -> impl Iterator<Item = &ParentLocator> {
        self.parent_locators.iter().filter(|l| !l.is_empty())
    }

    /// Decoded text of every active locator with the given platform code
    pub fn locator_texts(&self, platform_code: [u8; 4]) -> impl Iterator<Item = &str> {
        self.active_locators()
            .filter(move |l| l.platform_code == platform_code)
            .filter_map(|l| l.text.as_deref())
    }

    /// Read the data of every active locator from `file`
    pub fn load_locators(&mut self, file: &File) -> Result<()> {
        for locator in self.parent_locators.iter_mut() {
            locator.load_text(file)?;
        }
        Ok(())
    }
}
