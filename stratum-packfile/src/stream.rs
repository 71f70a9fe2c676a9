//! Per-column read streams: marks plus a decompressing frame reader.

use std::path::PathBuf;
use std::sync::Arc;

use stratum_common::checksum::ChecksumAlgo;
use stratum_common::codecs::get_u32;
use stratum_common::file_provider::{FileProvider, RandomAccessFile};
use stratum_common::{CancelToken, IoLimiter};
use stratum_result::{Error, Result};

use crate::compress::{decode_frame, decode_header, header_len};
use crate::mark::Mark;
use crate::scan_context::ScanContext;

/// Buffered decompressing reader over one column file.
///
/// Frames never split a pack, so a seek positions on a frame boundary and a
/// pack is always fully contained in the current decompressed block.
pub struct FrameReader {
    file: Arc<dyn RandomAccessFile>,
    file_size: u64,
    checksum_algo: ChecksumAlgo,
    /// Decompressed bytes of the currently loaded frame.
    buffer: Vec<u8>,
    /// File offset of the loaded frame; `u64::MAX` when nothing is loaded.
    frame_offset: u64,
    /// File offset right after the loaded frame.
    next_frame_offset: u64,
    pos: usize,
    scan: Option<Arc<ScanContext>>,
    limiter: Option<Arc<IoLimiter>>,
    cancel: CancelToken,
}

impl FrameReader {
    pub fn open(
        provider: &Arc<dyn FileProvider>,
        path: &PathBuf,
        checksum_algo: ChecksumAlgo,
        scan: Option<Arc<ScanContext>>,
        limiter: Option<Arc<IoLimiter>>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let file = provider.open_for_read(path)?;
        let file_size = file.file_size()?;
        Ok(Self {
            file,
            file_size,
            checksum_algo,
            buffer: Vec::new(),
            frame_offset: u64::MAX,
            next_frame_offset: 0,
            pos: 0,
            scan,
            limiter,
            cancel,
        })
    }

    fn load_frame(&mut self, offset: u64) -> Result<()> {
        self.cancel.check()?;
        if offset >= self.file_size {
            return Err(Error::LogicalError(format!(
                "frame offset {offset} beyond file size {}",
                self.file_size
            )));
        }
        let head_len = header_len(self.checksum_algo);
        let mut head = vec![0u8; head_len];
        self.file.read_at(&mut head, offset)?;
        let header = decode_header(&head, self.checksum_algo)?;

        if let Some(limiter) = &self.limiter {
            limiter.request(header.disk_len, &self.cancel)?;
        }
        let mut frame = vec![0u8; header.disk_len];
        self.file.read_at(&mut frame, offset)?;
        self.buffer = decode_frame(&frame, self.checksum_algo)?;
        self.frame_offset = offset;
        self.next_frame_offset = offset + header.disk_len as u64;
        self.pos = 0;
        if let Some(scan) = &self.scan {
            scan.add_read_bytes(header.disk_len as u64);
        }
        Ok(())
    }

    /// Position on `mark`. A no-op when already inside that frame at or
    /// before the target offset isn't guaranteed, so the frame reloads only
    /// when it differs.
    pub fn seek(&mut self, mark: Mark) -> Result<()> {
        if self.frame_offset != mark.offset_in_file {
            self.load_frame(mark.offset_in_file)?;
        }
        let target = mark.offset_in_decompressed as usize;
        if target > self.buffer.len() {
            return Err(Error::LogicalError(format!(
                "mark decompressed offset {target} beyond block of {} bytes",
                self.buffer.len()
            )));
        }
        self.pos = target;
        Ok(())
    }

    /// Read the next length-prefixed pack body at the cursor, advancing past
    /// it. Loads the next frame when the current one is exhausted.
    pub fn read_pack_body(&mut self) -> Result<Vec<u8>> {
        if self.pos >= self.buffer.len() {
            let next = self.next_frame_offset;
            self.load_frame(next)?;
        }
        if self.pos + 4 > self.buffer.len() {
            return Err(Error::LogicalError("pack length prefix truncated".into()));
        }
        let len = get_u32(&self.buffer[self.pos..]) as usize;
        let begin = self.pos + 4;
        if begin + len > self.buffer.len() {
            return Err(Error::LogicalError(
                "pack body crosses a frame boundary".into(),
            ));
        }
        self.pos = begin + len;
        Ok(self.buffer[begin..begin + len].to_vec())
    }
}

/// One column's read state: parsed marks plus data and null-map readers.
pub struct ColumnReadStream {
    pub marks: Arc<Vec<Mark>>,
    pub null_marks: Option<Arc<Vec<Mark>>>,
    pub data: FrameReader,
    pub nulls: Option<FrameReader>,
    pub avg_size_hint: u64,
}

impl ColumnReadStream {
    /// Seek both substreams to `pack_id`.
    pub fn seek_to_pack(&mut self, pack_id: usize) -> Result<()> {
        let mark = *self
            .marks
            .get(pack_id)
            .ok_or_else(|| Error::LogicalError(format!("no mark for pack {pack_id}")))?;
        self.data.seek(mark)?;
        if let (Some(nulls), Some(null_marks)) = (self.nulls.as_mut(), self.null_marks.as_ref()) {
            let mark = *null_marks
                .get(pack_id)
                .ok_or_else(|| Error::LogicalError(format!("no null mark for pack {pack_id}")))?;
            nulls.seek(mark)?;
        }
        Ok(())
    }
}
