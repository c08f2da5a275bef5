//! VHD (Virtual Hard Disk) shared type definitions
//!
//! Disk type and geometry enumerations plus the big-endian field readers and
//! checksum routine the footer and dynamic header codecs are built on.

use vhdflat_core::security::MAX_SAFE_INTEGER;
use vhdflat_core::{Error, Result};

/// All-ones pattern marking an absent 64-bit offset
pub const NO_OFFSET: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// VHD disk type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum VhdType {
    None = 0,
    Reserved1 = 1,
    Fixed = 2,
    Dynamic = 3,
    Differencing = 4,
    Reserved5 = 5,
    Reserved6 = 6,
}

impl VhdType {
    /// Parse VHD type from a u32 value
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(VhdType::None),
            1 => Ok(VhdType::Reserved1),
            2 => Ok(VhdType::Fixed),
            3 => Ok(VhdType::Dynamic),
            4 => Ok(VhdType::Differencing),
            5 => Ok(VhdType::Reserved5),
            6 => Ok(VhdType::Reserved6),
            _ => Err(Error::format(format!("Invalid VHD disk type: {}", value))),
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            VhdType::Fixed => "Fixed",
            VhdType::Dynamic => "Dynamic",
            VhdType::Differencing => "Differencing",
            VhdType::None => "None",
            _ => "Reserved",
        }
    }

    /// True for the types backed by a dynamic header and BAT
    pub fn is_sparse(&self) -> bool {
        matches!(self, VhdType::Dynamic | VhdType::Differencing)
    }
}

/// Disk geometry (CHS addressing)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors: u8,
}

impl DiskGeometry {
    /// Parse disk geometry from bytes
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            cylinders: u16::from_be_bytes([bytes[0], bytes[1]]),
            heads: bytes[2],
            sectors: bytes[3],
        }
    }

    /// Convert geometry to bytes
    pub fn to_bytes(&self) -> [u8; 4] {
        let cyl_bytes = self.cylinders.to_be_bytes();
        [cyl_bytes[0], cyl_bytes[1], self.heads, self.sectors]
    }
}

pub(crate) fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

pub(crate) fn be_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub(crate) fn be_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(buf)
}

fn check_safe(value: u64, field: &str) -> Result<u64> {
    if value > MAX_SAFE_INTEGER {
        return Err(Error::precision(format!(
            "{} value {:#x} exceeds 2^53 - 1",
            field, value
        )));
    }
    Ok(value)
}

/// Read a 64-bit offset where the all-ones pattern means "none"
pub(crate) fn read_offset(bytes: &[u8], at: usize, field: &str) -> Result<Option<u64>> {
    match be_u64(bytes, at) {
        NO_OFFSET => Ok(None),
        value => check_safe(value, field).map(Some),
    }
}

/// Read a 64-bit size or offset that must be present
pub(crate) fn read_required(bytes: &[u8], at: usize, field: &str) -> Result<u64> {
    match be_u64(bytes, at) {
        NO_OFFSET => Err(Error::precision(format!(
            "{} holds the all-ones sentinel",
            field
        ))),
        value => check_safe(value, field),
    }
}

/// One's complement of the byte sum, skipping the 4-byte checksum field
pub(crate) fn ones_complement_checksum(bytes: &[u8], checksum_at: usize) -> u32 {
    let sum = bytes
        .iter()
        .enumerate()
        .filter(|(i, _)| !(checksum_at..checksum_at + 4).contains(i))
        .fold(0u32, |sum, (_, &b)| sum.wrapping_add(b as u32));
    !sum
}
