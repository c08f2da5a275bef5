//! Safety limits and validation helpers
//!
//! Sizes and counts read from an image are untrusted. These limits keep a
//! corrupt or crafted image from exhausting memory or recursing forever.

use crate::Error;

/// Largest value a 64-bit on-disk field may hold (2^53 - 1)
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Maximum allocation size for a single metadata buffer (256 MB)
pub const MAX_ALLOCATION_SIZE: usize = 256 * 1024 * 1024;

/// Maximum block size accepted from a dynamic header (256 MB)
pub const MAX_BLOCK_SIZE: u32 = 256 * 1024 * 1024;

/// Maximum length of one parent locator's platform data (64 KB)
pub const MAX_LOCATOR_DATA_LENGTH: u32 = 64 * 1024;

/// Maximum depth of a differencing chain (prevents cyclic parent links)
pub const MAX_CHAIN_DEPTH: usize = 64;

/// Validate that a size is within allocation limits
///
/// # Security
/// Prevents memory exhaustion from malicious disk images
pub fn validate_allocation_size(size: u64, limit: usize, context: &str) -> crate::Result<usize> {
    if size > limit as u64 {
        return Err(Error::limit(format!(
            "{} size {} exceeds limit {}",
            context, size, limit
        )));
    }

    size.try_into()
        .map_err(|_| Error::limit(format!("{} size exceeds platform limits", context)))
}

/// Safely multiply two u64 values with overflow checking
pub fn checked_multiply_u64(a: u64, b: u64, context: &str) -> crate::Result<u64> {
    a.checked_mul(b)
        .ok_or_else(|| Error::limit(format!("{}: multiplication overflow", context)))
}

/// Safely convert u64 to usize with platform checking
///
/// # Security
/// Prevents truncation on 32-bit platforms
pub fn u64_to_usize(value: u64, context: &str) -> crate::Result<usize> {
    value.try_into().map_err(|_| {
        Error::limit(format!(
            "{}: value {} exceeds platform usize limit",
            context, value
        ))
    })
}

/// Validate a dynamic disk block size
///
/// Must be a non-zero power of two, a whole number of sectors, and within
/// [`MAX_BLOCK_SIZE`].
pub fn validate_block_size(block_size: u32) -> crate::Result<()> {
    if block_size == 0 || !block_size.is_power_of_two() {
        return Err(Error::format(format!(
            "Block size {} is not a power of 2",
            block_size
        )));
    }

    if (block_size as u64) < crate::SECTOR_SIZE {
        return Err(Error::format(format!(
            "Block size {} is smaller than a sector",
            block_size
        )));
    }

    if block_size > MAX_BLOCK_SIZE {
        return Err(Error::limit(format!(
            "Block size {} exceeds limit {}",
            block_size, MAX_BLOCK_SIZE
        )));
    }

    Ok(())
}

/// Validate the depth of a parent chain before opening one more level
pub fn validate_chain_depth(depth: usize) -> crate::Result<()> {
    if depth > MAX_CHAIN_DEPTH {
        return Err(Error::limit(format!(
            "Differencing chain deeper than {} levels",
            MAX_CHAIN_DEPTH
        )));
    }
    Ok(())
}
