//! Sector-level merge of a differencing block with its parent
//!
//! A partially written block of a differencing disk holds some sectors of
//! its own and inherits the rest. The block bitmap says which: bit set
//! means the child's sector is authoritative. [`SectorMerge`] interleaves
//! two chunk streams covering the same range according to that bitmap.

use tracing::trace;
use vhdflat_core::{ChunkSource, Error, Result, SECTOR_SIZE};

const BASE: usize = 0;
const OWN: usize = 1;

/// Bit `bit` of a block bitmap, most significant bit first
pub fn bitmap_bit(bitmap: &[u8], bit: u64) -> bool {
    let byte = bitmap.get((bit / 8) as usize).copied().unwrap_or(0);
    (byte >> (7 - (bit % 8))) & 1 == 1
}

/// Interleaves sectors of `base` (parent) and `own` (child) by bitmap
///
/// Chunks may arrive in any size from either side; they are buffered until
/// both sides hold at least one whole sector. Each drain emits one chunk.
pub struct SectorMerge<B, O> {
    base: B,
    own: O,
    pending: [Vec<u8>; 2],
    ended: [bool; 2],
    consumed: [u64; 2],
    bitmap: Vec<u8>,
    bit: u64,
    sector_size: usize,
    finished: bool,
}

impl<B: ChunkSource, O: ChunkSource> SectorMerge<B, O> {
    /// Merge `base` and `own`, the first sector of both mapping to `start_bit`
    pub fn new(base: B, own: O, bitmap: Vec<u8>, start_bit: u64) -> Self {
        Self::with_sector_size(base, own, bitmap, start_bit, SECTOR_SIZE as usize)
    }

    pub fn with_sector_size(
        base: B,
        own: O,
        bitmap: Vec<u8>,
        start_bit: u64,
        sector_size: usize,
    ) -> Self {
        Self {
            base,
            own,
            pending: [Vec::new(), Vec::new()],
            ended: [false, false],
            consumed: [0, 0],
            bitmap,
            bit: start_bit,
            sector_size,
            finished: false,
        }
    }

    /// Cumulative bytes received from (base, own)
    pub fn consumed(&self) -> [u64; 2] {
        self.consumed
    }

    fn drain(&mut self, sectors: usize) -> Vec<u8> {
        let ss = self.sector_size;
        let mut out = Vec::with_capacity(sectors * ss);
        for k in 0..sectors {
            let side = if bitmap_bit(&self.bitmap, self.bit) {
                OWN
            } else {
                BASE
            };
            out.extend_from_slice(&self.pending[side][k * ss..(k + 1) * ss]);
            self.bit += 1;
        }
        for buf in self.pending.iter_mut() {
            buf.drain(..sectors * ss);
        }
        trace!(sectors, next_bit = self.bit, "merged sectors");
        out
    }

    /// Side to pull from next: a short side first, else any live side
    fn next_side(&self) -> usize {
        let ss = self.sector_size;
        let short = |side: usize| !self.ended[side] && self.pending[side].len() < ss;
        if short(BASE) {
            BASE
        } else if short(OWN) {
            OWN
        } else if !self.ended[BASE] {
            BASE
        } else {
            OWN
        }
    }

    fn pull(&mut self, side: usize) -> Option<Result<Vec<u8>>> {
        match side {
            BASE => self.base.next(),
            _ => self.own.next(),
        }
    }
}

impl<B: ChunkSource, O: ChunkSource> Iterator for SectorMerge<B, O> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let sectors = self
                .pending
                .iter()
                .map(|buf| buf.len() / self.sector_size)
                .min()
                .unwrap_or(0);
            if sectors > 0 {
                return Some(Ok(self.drain(sectors)));
            }

            if self.ended[BASE] && self.ended[OWN] {
                self.finished = true;
                if self.pending.iter().all(|buf| buf.is_empty()) {
                    return None;
                }
                return Some(Err(Error::SizeMismatch {
                    remaining: [self.pending[BASE].len(), self.pending[OWN].len()],
                    consumed: self.consumed,
                }));
            }

            let side = self.next_side();
            match self.pull(side) {
                Some(Ok(chunk)) => {
                    self.consumed[side] += chunk.len() as u64;
                    self.pending[side].extend_from_slice(&chunk);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => self.ended[side] = true,
            }
        }
    }
}
