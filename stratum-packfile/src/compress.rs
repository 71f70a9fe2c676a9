//! Frame codec for column data files.
//!
//! A data file is a sequence of frames:
//!
//! ```text
//! [checksum u64]  -- only when the file carries frame checksums
//! [method u8] [compressed_len u32] [decompressed_len u32]
//! [payload: compressed_len bytes]
//! ```
//!
//! The checksum digests the header-after-checksum plus the payload. Marks
//! point at frame start offsets, so a seek lands on a header.

use serde::{Deserialize, Serialize};
use stratum_common::checksum::{digest, ChecksumAlgo};
use stratum_common::codecs::{get_u32, get_u64, put_u32, put_u64};
use stratum_result::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompressionMethod {
    None = 0,
    #[default]
    Lz4 = 1,
    Zstd = 2,
}

impl CompressionMethod {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Lz4),
            2 => Ok(CompressionMethod::Zstd),
            other => Err(Error::LogicalError(format!(
                "unknown compression method tag {other}"
            ))),
        }
    }
}

/// Fixed header bytes after the optional checksum.
const FRAME_HEADER_LEN: usize = 1 + 4 + 4;

/// Serialize one frame. Returns the encoded bytes (checksum included when
/// `checksum_algo` is not `None`).
pub fn encode_frame(
    payload: &[u8],
    method: CompressionMethod,
    level: i32,
    checksum_algo: ChecksumAlgo,
) -> Result<Vec<u8>> {
    let compressed = match method {
        CompressionMethod::None => payload.to_vec(),
        CompressionMethod::Lz4 => lz4_flex::block::compress(payload),
        CompressionMethod::Zstd => zstd::bulk::compress(payload, level)?,
    };

    let mut body = Vec::with_capacity(FRAME_HEADER_LEN + compressed.len());
    body.push(method as u8);
    put_u32(&mut body, compressed.len() as u32);
    put_u32(&mut body, payload.len() as u32);
    body.extend_from_slice(&compressed);

    if checksum_algo == ChecksumAlgo::None {
        return Ok(body);
    }
    let mut out = Vec::with_capacity(8 + body.len());
    put_u64(&mut out, digest(checksum_algo, &body));
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parsed frame header.
#[derive(Clone, Copy, Debug)]
pub struct FrameHeader {
    pub method: CompressionMethod,
    pub compressed_len: usize,
    pub decompressed_len: usize,
    /// Total on-disk bytes of the frame, checksum and header included.
    pub disk_len: usize,
}

pub fn header_len(checksum_algo: ChecksumAlgo) -> usize {
    checksum_algo.digest_width() + FRAME_HEADER_LEN
}

/// Parse a frame header from `buf` (which must hold at least
/// `header_len(checksum_algo)` bytes).
pub fn decode_header(buf: &[u8], checksum_algo: ChecksumAlgo) -> Result<FrameHeader> {
    let skip = checksum_algo.digest_width();
    if buf.len() < skip + FRAME_HEADER_LEN {
        return Err(Error::LogicalError("frame header truncated".into()));
    }
    let method = CompressionMethod::from_tag(buf[skip])?;
    let compressed_len = get_u32(&buf[skip + 1..]) as usize;
    let decompressed_len = get_u32(&buf[skip + 5..]) as usize;
    Ok(FrameHeader {
        method,
        compressed_len,
        decompressed_len,
        disk_len: skip + FRAME_HEADER_LEN + compressed_len,
    })
}

/// Verify (if configured) and decompress one full frame buffer.
pub fn decode_frame(buf: &[u8], checksum_algo: ChecksumAlgo) -> Result<Vec<u8>> {
    let header = decode_header(buf, checksum_algo)?;
    let skip = checksum_algo.digest_width();
    if buf.len() < header.disk_len {
        return Err(Error::LogicalError("frame body truncated".into()));
    }
    if checksum_algo != ChecksumAlgo::None {
        let expected = get_u64(buf);
        let actual = digest(checksum_algo, &buf[skip..header.disk_len]);
        if expected != actual {
            return Err(Error::ChecksumMismatch(format!(
                "frame checksum expected={expected:#x} actual={actual:#x}"
            )));
        }
    }
    let payload = &buf[skip + FRAME_HEADER_LEN..header.disk_len];
    match header.method {
        CompressionMethod::None => Ok(payload.to_vec()),
        CompressionMethod::Lz4 => lz4_flex::block::decompress(payload, header.decompressed_len)
            .map_err(|e| Error::LogicalError(format!("lz4 decompress failed: {e}"))),
        CompressionMethod::Zstd => {
            Ok(zstd::bulk::decompress(payload, header.decompressed_len)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(method: CompressionMethod, algo: ChecksumAlgo) {
        let payload: Vec<u8> = (0..10_000u32).flat_map(|v| (v % 251).to_le_bytes()).collect();
        let frame = encode_frame(&payload, method, 1, algo).unwrap();
        let back = decode_frame(&frame, algo).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn all_methods_round_trip() {
        for method in [
            CompressionMethod::None,
            CompressionMethod::Lz4,
            CompressionMethod::Zstd,
        ] {
            for algo in [ChecksumAlgo::None, ChecksumAlgo::Crc32, ChecksumAlgo::Crc64, ChecksumAlgo::Xxh3] {
                round_trip(method, algo);
            }
        }
    }

    #[test]
    fn corrupted_frame_fails_checksum() {
        let payload = vec![42u8; 5000];
        let mut frame =
            encode_frame(&payload, CompressionMethod::Lz4, 1, ChecksumAlgo::Crc64).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        let err = decode_frame(&frame, ChecksumAlgo::Crc64).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch(_)));
    }

    #[test]
    fn unchecksummed_frame_has_no_digest_prefix() {
        let frame =
            encode_frame(b"abc", CompressionMethod::None, 0, ChecksumAlgo::None).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 3);
    }
}
