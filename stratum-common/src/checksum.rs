//! Checksum digests used by the page store and pack files.
//!
//! The page store always digests with CRC64. Pack files carry a per-file
//! algorithm chosen at write time; the reader refuses files whose configured
//! algorithm differs from what it was asked to verify with.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// Checksum algorithm tag. The `u8` values are stable on-disk identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumAlgo {
    None = 0,
    Crc32 = 1,
    #[default]
    Crc64 = 2,
    Xxh3 = 3,
}

impl ChecksumAlgo {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ChecksumAlgo::None),
            1 => Some(ChecksumAlgo::Crc32),
            2 => Some(ChecksumAlgo::Crc64),
            3 => Some(ChecksumAlgo::Xxh3),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Bytes occupied by one digest of this algorithm in a frame header.
    pub fn digest_width(self) -> usize {
        match self {
            ChecksumAlgo::None => 0,
            _ => 8,
        }
    }
}

/// A running digest. `None` digests to 0 and always verifies.
pub enum Digest {
    None,
    Crc32(crc32fast::Hasher),
    Crc64(crc64fast::Digest),
    Xxh3(Box<Xxh3>),
}

impl Digest {
    pub fn new(algo: ChecksumAlgo) -> Self {
        match algo {
            ChecksumAlgo::None => Digest::None,
            ChecksumAlgo::Crc32 => Digest::Crc32(crc32fast::Hasher::new()),
            ChecksumAlgo::Crc64 => Digest::Crc64(crc64fast::Digest::new()),
            ChecksumAlgo::Xxh3 => Digest::Xxh3(Box::new(Xxh3::new())),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Digest::None => {}
            Digest::Crc32(h) => h.update(bytes),
            Digest::Crc64(d) => d.write(bytes),
            Digest::Xxh3(x) => x.update(bytes),
        }
    }

    pub fn finish(self) -> u64 {
        match self {
            Digest::None => 0,
            Digest::Crc32(h) => h.finalize() as u64,
            Digest::Crc64(d) => d.sum64(),
            Digest::Xxh3(x) => x.digest(),
        }
    }
}

/// One-shot CRC64 of a byte slice; the page store's checksum of record.
pub fn crc64(bytes: &[u8]) -> u64 {
    let mut d = crc64fast::Digest::new();
    d.write(bytes);
    d.sum64()
}

/// One-shot digest with an arbitrary algorithm.
pub fn digest(algo: ChecksumAlgo, bytes: &[u8]) -> u64 {
    let mut d = Digest::new(algo);
    d.update(bytes);
    d.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_matches_streaming() {
        let data = b"the quick brown fox jumps over the lazy dog";
        for algo in [ChecksumAlgo::Crc32, ChecksumAlgo::Crc64, ChecksumAlgo::Xxh3] {
            let mut d = Digest::new(algo);
            d.update(&data[..10]);
            d.update(&data[10..]);
            assert_eq!(d.finish(), digest(algo, data));
        }
    }

    #[test]
    fn single_byte_flip_changes_digest() {
        let mut data = vec![7u8; 4096];
        let before = crc64(&data);
        data[1234] ^= 0x01;
        assert_ne!(before, crc64(&data));
    }

    #[test]
    fn tag_round_trip() {
        for algo in [
            ChecksumAlgo::None,
            ChecksumAlgo::Crc32,
            ChecksumAlgo::Crc64,
            ChecksumAlgo::Xxh3,
        ] {
            assert_eq!(ChecksumAlgo::from_tag(algo.tag()), Some(algo));
        }
        assert_eq!(ChecksumAlgo::from_tag(9), None);
    }
}
