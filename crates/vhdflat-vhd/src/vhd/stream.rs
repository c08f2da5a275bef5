//! Flattened disk stream
//!
//! [`VhdReadStream`] walks the requested range block by block and hands out
//! the chunks of one sub-stream at a time: a file range, a run of zeros,
//! the parent's own stream, a sector merge of both, or the footer.

use super::merge::{bitmap_bit, SectorMerge};
use super::VhdInfo;
use std::fmt;
use std::io::{self, Read};
use tracing::debug;
use vhdflat_core::security::u64_to_usize;
use vhdflat_core::{Error, Result, SECTOR_SIZE};
use vhdflat_pipeline::{read_vec_at, FileRange, ZeroFill};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Finished,
    Failed,
    Destroyed,
}

/// Where the bytes of one block come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockSource {
    /// Absent from the whole chain
    Skip,
    Own,
    Parent,
    /// Present here and possibly in the parent: the bitmap decides
    Both,
}

/// Own, Parent or Both depending on `sectors` bitmap bits from `start_bit`
fn bitmap_source(bitmap: &[u8], start_bit: u64, sectors: u64) -> BlockSource {
    let mut bits = (start_bit..start_bit + sectors).map(|bit| bitmap_bit(bitmap, bit));
    let Some(first) = bits.next() else {
        return BlockSource::Own;
    };
    match (first, bits.all(|bit| bit == first)) {
        (true, true) => BlockSource::Own,
        (false, true) => BlockSource::Parent,
        _ => BlockSource::Both,
    }
}

/// One source of chunks, consumed to the end before the next is built
pub enum SubStream<'a> {
    FileRange(FileRange<'a>),
    ZeroFill(ZeroFill),
    /// The parent's stream, zero-padded past the parent's size
    Parent {
        stream: Box<VhdReadStream<'a>>,
        padding: ZeroFill,
    },
    Footer(Option<Vec<u8>>),
    Merge(Box<SectorMerge<SubStream<'a>, SubStream<'a>>>),
}

impl Iterator for SubStream<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SubStream::FileRange(range) => range.next(),
            SubStream::ZeroFill(zeros) => zeros.next(),
            SubStream::Parent { stream, padding } => stream.next().or_else(|| padding.next()),
            SubStream::Footer(bytes) => bytes.take().map(Ok),
            SubStream::Merge(merge) => merge.next(),
        }
    }
}

impl fmt::Debug for SubStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubStream::FileRange(range) => write!(f, "FileRange({} left)", range.remaining()),
            SubStream::ZeroFill(zeros) => write!(f, "ZeroFill({} left)", zeros.remaining()),
            SubStream::Parent { .. } => f.write_str("Parent"),
            SubStream::Footer(_) => f.write_str("Footer"),
            SubStream::Merge(_) => f.write_str("Merge"),
        }
    }
}

/// Forward-only stream of the flattened disk
///
/// Yields `Ok` chunks in ascending logical order, then `None`. The first
/// error is yielded once and ends the stream. Also readable through
/// [`std::io::Read`].
pub struct VhdReadStream<'a> {
    info: &'a VhdInfo,
    buffer_size: usize,
    start: u64,
    /// Exclusive end of the request
    end: u64,
    /// Exclusive end of the disk data part of the request
    data_end: u64,
    /// Next logical offset to plan
    cursor: u64,
    /// Zeros owed for skipped blocks, emitted before the next real output
    owed_zeros: u64,
    footer_done: bool,
    emitted: u64,
    active: Option<SubStream<'a>>,
    state: StreamState,
    leftover: Vec<u8>,
    leftover_pos: usize,
}

impl<'a> VhdReadStream<'a> {
    /// Stream logical bytes `start..end` of `info`; an empty range if `end <= start`
    pub(crate) fn new(info: &'a VhdInfo, start: u64, end: u64, buffer_size: usize) -> Self {
        let end = end.max(start);
        Self {
            info,
            buffer_size,
            start,
            end,
            data_end: end.min(info.footer().current_size).max(start),
            cursor: start,
            owed_zeros: 0,
            footer_done: false,
            emitted: 0,
            active: None,
            state: StreamState::Streaming,
            leftover: Vec::new(),
            leftover_pos: 0,
        }
    }

    /// Total number of bytes the stream produces when read to the end
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Logical offset of the next byte to be yielded
    pub fn position(&self) -> u64 {
        self.start + self.emitted
    }

    /// False once the stream failed or was destroyed
    pub fn is_readable(&self) -> bool {
        matches!(self.state, StreamState::Streaming | StreamState::Finished)
    }

    /// Stop the stream, dropping the active sub-stream
    ///
    /// Blocks not yet reached are never opened.
    pub fn destroy(&mut self) {
        self.state = StreamState::Destroyed;
        self.active = None;
        self.leftover.clear();
        self.leftover_pos = 0;
    }

    fn fail(&mut self) {
        self.state = StreamState::Failed;
        self.active = None;
    }

    fn classify(&self, index: usize) -> BlockSource {
        let Some(sparse) = self.info.sparse.as_ref() else {
            return BlockSource::Own;
        };
        let own = sparse.bat.is_present(index);
        let parent = self.info.parent.is_some() && sparse.coverage.may_be_in_parent(index);
        match (own, parent) {
            (false, false) => BlockSource::Skip,
            (true, false) => BlockSource::Own,
            (false, true) => BlockSource::Parent,
            (true, true) => BlockSource::Both,
        }
    }

    /// Build the next sub-stream, or `None` once everything is planned
    fn next_sub_stream(&mut self) -> Result<Option<SubStream<'a>>> {
        let info = self.info;

        while self.cursor < self.data_end {
            let Some(sparse) = info.sparse.as_ref() else {
                let range = FileRange::new(
                    info.file(),
                    self.cursor,
                    self.data_end - self.cursor,
                    self.buffer_size,
                );
                self.cursor = self.data_end;
                return Ok(Some(SubStream::FileRange(range)));
            };

            let bat = &sparse.bat;
            let block_size = bat.block_size as u64;
            let index = bat.offset_to_block(self.cursor);

            // Past the table the rest is zeros, whatever the parent holds
            if index >= bat.len() {
                self.owed_zeros += self.data_end - self.cursor;
                self.cursor = self.data_end;
                break;
            }

            let lo = self.cursor;
            let hi = ((index as u64 + 1) * block_size).min(self.data_end);
            let source = self.classify(index);

            if source == BlockSource::Skip {
                self.owed_zeros += hi - lo;
                self.cursor = hi;
                continue;
            }
            if self.owed_zeros > 0 {
                return Ok(Some(self.take_owed_zeros()));
            }

            self.cursor = hi;
            return self.block_stream(index, lo, hi, source).map(Some);
        }

        if self.owed_zeros > 0 {
            return Ok(Some(self.take_owed_zeros()));
        }

        if !self.footer_done {
            self.footer_done = true;
            let current_size = info.footer().current_size;
            let footer_lo = self.start.max(current_size);
            if self.end > footer_lo {
                let from = (footer_lo - current_size) as usize;
                let to = (self.end - current_size) as usize;
                let bytes = info.flattened_footer().as_bytes()[from..to].to_vec();
                return Ok(Some(SubStream::Footer(Some(bytes))));
            }
        }

        Ok(None)
    }

    fn take_owed_zeros(&mut self) -> SubStream<'a> {
        let zeros = ZeroFill::new(self.owed_zeros, self.buffer_size);
        self.owed_zeros = 0;
        SubStream::ZeroFill(zeros)
    }

    /// Sub-stream for logical bytes `lo..hi` inside block `index`
    fn block_stream(
        &self,
        index: usize,
        lo: u64,
        hi: u64,
        source: BlockSource,
    ) -> Result<SubStream<'a>> {
        if source == BlockSource::Both {
            let bitmap = self.read_bitmap(index)?;
            let start_bit = (lo % self.block_size()) / SECTOR_SIZE;
            let sectors = (hi - lo).div_ceil(SECTOR_SIZE);
            let resolved = bitmap_source(&bitmap, start_bit, sectors);
            if resolved != BlockSource::Both {
                return self.block_stream(index, lo, hi, resolved);
            }

            debug!(block = index, lo, hi, start_bit, "merging block with parent");
            let merge = SectorMerge::new(
                self.parent_stream(lo, hi)?,
                self.own_stream(index, lo, hi)?,
                bitmap,
                start_bit,
            );
            return Ok(SubStream::Merge(Box::new(merge)));
        }

        debug!(block = index, lo, hi, ?source, "block source");
        match source {
            BlockSource::Own => self.own_stream(index, lo, hi),
            BlockSource::Parent => self.parent_stream(lo, hi),
            _ => Ok(SubStream::ZeroFill(ZeroFill::new(hi - lo, self.buffer_size))),
        }
    }

    fn block_size(&self) -> u64 {
        self.info
            .bat()
            .map_or(SECTOR_SIZE, |bat| bat.block_size as u64)
    }

    fn read_bitmap(&self, index: usize) -> Result<Vec<u8>> {
        let bat = self
            .info
            .bat()
            .ok_or_else(|| Error::format("Block bitmap requested for a fixed disk"))?;
        let offset = bat
            .bitmap_offset(index)
            .ok_or_else(|| Error::format(format!("Block {} has no bitmap", index)))?;
        let len = u64_to_usize(bat.bitmap_size(), "block bitmap")?;
        read_vec_at(self.info.file(), offset, len, "block bitmap")
    }

    fn own_stream(&self, index: usize, lo: u64, hi: u64) -> Result<SubStream<'a>> {
        let info = self.info;
        let data = info
            .bat()
            .and_then(|bat| bat.data_offset(index))
            .ok_or_else(|| Error::format(format!("Block {} is not allocated", index)))?;
        let local = lo % self.block_size();
        Ok(SubStream::FileRange(FileRange::new(
            info.file(),
            data + local,
            hi - lo,
            self.buffer_size,
        )))
    }

    /// The parent's bytes `lo..hi`, zero-padded past the parent's size
    fn parent_stream(&self, lo: u64, hi: u64) -> Result<SubStream<'a>> {
        let parent = self
            .info
            .parent()
            .ok_or_else(|| Error::format("Differencing disk has no parent"))?;
        let parent_end = hi.min(parent.footer().current_size).max(lo);
        let stream = VhdReadStream::new(parent, lo, parent_end, self.buffer_size);
        Ok(SubStream::Parent {
            stream: Box::new(stream),
            padding: ZeroFill::new(hi - parent_end, self.buffer_size),
        })
    }
}

impl Iterator for VhdReadStream<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state != StreamState::Streaming {
                return None;
            }

            if let Some(active) = self.active.as_mut() {
                match active.next() {
                    Some(Ok(chunk)) if chunk.is_empty() => {}
                    Some(Ok(chunk)) => {
                        self.emitted += chunk.len() as u64;
                        return Some(Ok(chunk));
                    }
                    Some(Err(e)) => {
                        self.fail();
                        return Some(Err(e));
                    }
                    None => self.active = None,
                }
                continue;
            }

            match self.next_sub_stream() {
                Ok(Some(sub)) => self.active = Some(sub),
                Ok(None) => {
                    self.state = StreamState::Finished;
                    return None;
                }
                Err(e) => {
                    self.fail();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl Read for VhdReadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.leftover_pos < self.leftover.len() {
                let available = &self.leftover[self.leftover_pos..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.leftover_pos += n;
                return Ok(n);
            }

            match self.state {
                StreamState::Failed => {
                    return Err(Error::unreadable("stream failed earlier").into_io())
                }
                StreamState::Destroyed => {
                    return Err(Error::unreadable("stream was destroyed").into_io())
                }
                _ => {}
            }

            match self.next() {
                Some(Ok(chunk)) => {
                    self.leftover = chunk;
                    self.leftover_pos = 0;
                }
                Some(Err(e)) => return Err(e.into_io()),
                None => return Ok(0),
            }
        }
    }
}

impl fmt::Debug for VhdReadStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VhdReadStream")
            .field("path", &self.info.path())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("position", &self.position())
            .field("state", &self.state)
            .field("active", &self.active)
            .finish()
    }
}
