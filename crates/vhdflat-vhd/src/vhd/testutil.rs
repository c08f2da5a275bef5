//! In-memory VHD image builders for tests

use super::header::{PLATFORM_W2KU, PLATFORM_W2RU};
use super::types::{ones_complement_checksum, DiskGeometry, VhdType, NO_OFFSET};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SECTOR: usize = 512;

/// A 512-byte footer with creator "test" and a valid checksum
pub fn footer_bytes(
    disk_type: VhdType,
    current_size: u64,
    data_offset: Option<u64>,
    unique_id: Uuid,
) -> [u8; 512] {
    let mut raw = [0u8; 512];
    raw[0..8].copy_from_slice(b"conectix");
    raw[8..12].copy_from_slice(&2u32.to_be_bytes());
    raw[12..16].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    raw[16..24].copy_from_slice(&data_offset.unwrap_or(NO_OFFSET).to_be_bytes());
    raw[28..32].copy_from_slice(b"test");
    raw[32..36].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    raw[36..40].copy_from_slice(b"Wi2k");
    raw[40..48].copy_from_slice(&current_size.to_be_bytes());
    raw[48..56].copy_from_slice(&current_size.to_be_bytes());
    let geometry = DiskGeometry {
        cylinders: 1024,
        heads: 16,
        sectors: 63,
    };
    raw[56..60].copy_from_slice(&geometry.to_bytes());
    raw[60..64].copy_from_slice(&(disk_type as u32).to_be_bytes());
    raw[68..84].copy_from_slice(unique_id.as_bytes());
    let checksum = ones_complement_checksum(&raw, 64);
    raw[64..68].copy_from_slice(&checksum.to_be_bytes());
    raw
}

pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn utf16be(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
}

/// Parent reference of a differencing image
#[derive(Debug, Clone)]
pub struct ParentLink {
    pub unique_id: Uuid,
    pub unicode_name: String,
    /// (platform code, locator text) written as locator data
    pub locators: Vec<([u8; 4], String)>,
}

impl ParentLink {
    pub fn new(unique_id: Uuid, unicode_name: &str) -> Self {
        Self {
            unique_id,
            unicode_name: unicode_name.to_string(),
            locators: Vec::new(),
        }
    }

    pub fn w2ru(mut self, text: &str) -> Self {
        self.locators.push((PLATFORM_W2RU, text.to_string()));
        self
    }

    pub fn w2ku(mut self, text: &str) -> Self {
        self.locators.push((PLATFORM_W2KU, text.to_string()));
        self
    }
}

/// A 1024-byte dynamic header with a valid checksum
///
/// `locators` are (platform code, data offset, data length) entries.
pub fn dynamic_header_bytes(
    table_offset: u64,
    max_table_entries: u32,
    block_size: u32,
    parent: Option<&ParentLink>,
    locators: &[([u8; 4], u64, u32)],
) -> [u8; 1024] {
    let mut raw = [0u8; 1024];
    raw[0..8].copy_from_slice(b"cxsparse");
    raw[8..16].copy_from_slice(&NO_OFFSET.to_be_bytes());
    raw[16..24].copy_from_slice(&table_offset.to_be_bytes());
    raw[24..28].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    raw[28..32].copy_from_slice(&max_table_entries.to_be_bytes());
    raw[32..36].copy_from_slice(&block_size.to_be_bytes());

    if let Some(link) = parent {
        raw[40..56].copy_from_slice(link.unique_id.as_bytes());
        let name = utf16be(&link.unicode_name);
        let len = name.len().min(510);
        raw[64..64 + len].copy_from_slice(&name[..len]);
    }

    for (slot, (code, offset, length)) in locators.iter().enumerate().take(8) {
        let at = 576 + slot * 24;
        raw[at..at + 4].copy_from_slice(code);
        let space = (*length as usize).div_ceil(SECTOR).max(1) as u32;
        raw[at + 4..at + 8].copy_from_slice(&space.to_be_bytes());
        raw[at + 8..at + 12].copy_from_slice(&length.to_be_bytes());
        raw[at + 16..at + 24].copy_from_slice(&offset.to_be_bytes());
    }

    let checksum = ones_complement_checksum(&raw, 36);
    raw[36..40].copy_from_slice(&checksum.to_be_bytes());
    raw
}

fn pad_to_sector(buf: &mut Vec<u8>) {
    let padded = buf.len().div_ceil(SECTOR) * SECTOR;
    buf.resize(padded, 0);
}

/// A fixed image: `data` followed by its footer
pub fn fixed_image(data: &[u8], unique_id: Uuid) -> Vec<u8> {
    let mut image = data.to_vec();
    image.extend_from_slice(&footer_bytes(
        VhdType::Fixed,
        data.len() as u64,
        None,
        unique_id,
    ));
    image
}

struct BuiltBlock {
    index: u32,
    bitmap: Vec<u8>,
    data: Vec<u8>,
}

/// Builder for dynamic and differencing images
///
/// Layout: footer copy, header at 512, BAT at 1536, locator data, then
/// each block as bitmap sectors plus data, then the footer.
pub struct DynamicImage {
    pub unique_id: Uuid,
    pub block_size: u32,
    pub max_table_entries: u32,
    pub current_size: u64,
    pub parent: Option<ParentLink>,
    blocks: Vec<BuiltBlock>,
}

impl DynamicImage {
    pub fn new(unique_id: Uuid, block_size: u32, max_table_entries: u32) -> Self {
        Self {
            unique_id,
            block_size,
            max_table_entries,
            current_size: block_size as u64 * max_table_entries as u64,
            parent: None,
            blocks: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: ParentLink) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_current_size(mut self, current_size: u64) -> Self {
        self.current_size = current_size;
        self
    }

    fn bitmap_len(&self) -> usize {
        (self.block_size as usize / SECTOR).div_ceil(8)
    }

    /// Block `index` with every sector owned by this image
    pub fn block(self, index: u32, data: Vec<u8>) -> Self {
        let bitmap = vec![0xFF; self.bitmap_len()];
        self.block_with_bitmap(index, bitmap, data)
    }

    /// Block `index` with `fill` in every sector
    pub fn filled_block(self, index: u32, fill: u8) -> Self {
        let data = vec![fill; self.block_size as usize];
        self.block(index, data)
    }

    pub fn block_with_bitmap(mut self, index: u32, bitmap: Vec<u8>, data: Vec<u8>) -> Self {
        assert_eq!(data.len(), self.block_size as usize);
        self.blocks.push(BuiltBlock {
            index,
            bitmap,
            data,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let disk_type = if self.parent.is_some() {
            VhdType::Differencing
        } else {
            VhdType::Dynamic
        };
        let footer = footer_bytes(disk_type, self.current_size, Some(512), self.unique_id);

        let table_offset = 1536u64;
        let mut body = Vec::new();
        let bat_len = self.max_table_entries as usize * 4;
        let mut after_bat = table_offset as usize + bat_len;
        after_bat = after_bat.div_ceil(SECTOR) * SECTOR;

        // Locator data
        let mut locators = Vec::new();
        let mut locator_data = Vec::new();
        if let Some(link) = &self.parent {
            for (code, text) in &link.locators {
                let bytes = if *code == PLATFORM_W2RU || *code == PLATFORM_W2KU {
                    utf16le(text)
                } else {
                    text.as_bytes().to_vec()
                };
                let offset = (after_bat + locator_data.len()) as u64;
                locators.push((*code, offset, bytes.len() as u32));
                locator_data.extend_from_slice(&bytes);
                pad_to_sector(&mut locator_data);
            }
        }

        // Blocks
        let bitmap_sectors = self.bitmap_len().div_ceil(SECTOR);
        let mut bat = vec![0xFFu8; bat_len];
        let mut block_area = Vec::new();
        let blocks_start = after_bat + locator_data.len();
        for block in &self.blocks {
            let sector = (blocks_start + block_area.len()) / SECTOR;
            let at = block.index as usize * 4;
            bat[at..at + 4].copy_from_slice(&(sector as u32).to_be_bytes());

            let mut bitmap = block.bitmap.clone();
            bitmap.resize(bitmap_sectors * SECTOR, 0);
            block_area.extend_from_slice(&bitmap);
            block_area.extend_from_slice(&block.data);
        }

        let header = dynamic_header_bytes(
            table_offset,
            self.max_table_entries,
            self.block_size,
            self.parent.as_ref(),
            &locators,
        );

        body.extend_from_slice(&footer);
        body.extend_from_slice(&header);
        body.extend_from_slice(&bat);
        body.resize(after_bat, 0);
        body.extend_from_slice(&locator_data);
        body.extend_from_slice(&block_area);
        body.extend_from_slice(&footer);
        body
    }

    /// Expected flattened disk contents (without footer), given the parent's
    pub fn flatten_over(&self, parent: Option<&[u8]>) -> Vec<u8> {
        let mut disk = vec![0u8; self.current_size as usize];
        let table_span = self.block_size as usize * self.max_table_entries as usize;
        if let Some(parent) = parent {
            // Nothing past the table comes from the parent
            let n = parent.len().min(disk.len()).min(table_span);
            disk[..n].copy_from_slice(&parent[..n]);
        }
        let bs = self.block_size as usize;
        for block in &self.blocks {
            let base = block.index as usize * bs;
            for sector in 0..bs / SECTOR {
                let byte = block.bitmap.get(sector / 8).copied().unwrap_or(0);
                let own = (byte >> (7 - sector % 8)) & 1 == 1 || self.parent.is_none();
                let at = base + sector * SECTOR;
                if own && at < disk.len() {
                    let end = (at + SECTOR).min(disk.len());
                    let from = sector * SECTOR;
                    disk[at..end].copy_from_slice(&block.data[from..from + (end - at)]);
                }
            }
        }
        disk
    }
}

/// Write `bytes` to `dir/name`
pub fn write_image(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    path
}
