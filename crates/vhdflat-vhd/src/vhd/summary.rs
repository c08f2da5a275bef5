//! Serializable description of an opened chain

use super::VhdInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Metadata of one image in a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub path: PathBuf,
    /// "Fixed", "Dynamic" or "Differencing"
    pub disk_type: String,
    pub unique_id: Uuid,
    /// Virtual disk size in bytes
    pub current_size: u64,
    pub created: Option<DateTime<Utc>>,
    pub creator_application: String,
    pub block_size: Option<u32>,
    pub max_table_entries: Option<u32>,
    /// Number of blocks stored in this file
    pub allocated_blocks: usize,
    /// Unique ID this image expects of its parent
    pub parent_unique_id: Option<Uuid>,
}

impl ImageSummary {
    pub fn of(info: &VhdInfo) -> Self {
        let footer = info.footer();
        let header = info.header();
        Self {
            path: info.path().to_path_buf(),
            disk_type: footer.disk_type.name().to_string(),
            unique_id: footer.unique_id,
            current_size: footer.current_size,
            created: footer.created_at(),
            creator_application: footer.creator_app_str(),
            block_size: header.map(|h| h.block_size),
            max_table_entries: header.map(|h| h.max_table_entries),
            allocated_blocks: info.indices().len(),
            parent_unique_id: info
                .is_diff()
                .then(|| header.map(|h| h.parent_unique_id))
                .flatten(),
        }
    }
}

/// Metadata of a whole chain, child first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSummary {
    pub images: Vec<ImageSummary>,
    /// Length of the flattened stream of the top image
    pub flattened_length: u64,
}

impl ChainSummary {
    pub fn of(info: &VhdInfo) -> Self {
        let images = std::iter::successors(Some(info), |level| level.parent())
            .map(ImageSummary::of)
            .collect();
        Self {
            images,
            flattened_length: info.flattened_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VhdConfig;
    use crate::vhd::testutil::{fixed_image, write_image, DynamicImage, ParentLink};
    use tempfile::TempDir;

    #[test]
    fn test_chain_summary() {
        let dir = TempDir::new().unwrap();
        let base_id = Uuid::from_u128(0x10);
        write_image(dir.path(), "base.vhd", &fixed_image(&[0u8; 8192], base_id));
        let child = DynamicImage::new(Uuid::from_u128(0x20), 4096, 2)
            .with_parent(ParentLink::new(base_id, "base.vhd").w2ru(".\\base.vhd"))
            .filled_block(1, 0x01);
        let path = write_image(dir.path(), "child.vhd", &child.build());

        let info = VhdInfo::open(&path, VhdConfig::default()).unwrap();
        let summary = ChainSummary::of(&info);

        assert_eq!(summary.images.len(), 2);
        assert_eq!(summary.flattened_length, 8192 + 512);

        let top = &summary.images[0];
        assert_eq!(top.disk_type, "Differencing");
        assert_eq!(top.block_size, Some(4096));
        assert_eq!(top.allocated_blocks, 1);
        assert_eq!(top.parent_unique_id, Some(base_id));
        assert_eq!(top.creator_application, "test");

        let base = &summary.images[1];
        assert_eq!(base.disk_type, "Fixed");
        assert_eq!(base.unique_id, base_id);
        assert_eq!(base.block_size, None);
        assert_eq!(base.parent_unique_id, None);
    }

    #[test]
    fn test_summary_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = write_image(dir.path(), "d.vhd", &DynamicImage::new(Uuid::nil(), 4096, 2).build());
        let info = VhdInfo::open(&path, VhdConfig::default()).unwrap();

        let summary = ChainSummary::of(&info);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"disk_type\":\"Dynamic\""));

        let back: ChainSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
