//! Marks: the sparse index mapping packs to positions in a column file.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use stratum_common::checksum::ChecksumAlgo;
use stratum_common::codecs::{put_u64, ByteReader};
use stratum_result::{Error, Result};

use crate::compress::{decode_frame, encode_frame, CompressionMethod};

/// One mark per pack: where the pack's frame starts in the compressed file
/// and how far into the decompressed block the pack begins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mark {
    pub offset_in_file: u64,
    pub offset_in_decompressed: u64,
}

pub fn encode_marks(marks: &[Mark], checksum_algo: ChecksumAlgo) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(marks.len() * 16);
    for mark in marks {
        put_u64(&mut raw, mark.offset_in_file);
        put_u64(&mut raw, mark.offset_in_decompressed);
    }
    if checksum_algo == ChecksumAlgo::None {
        // Legacy layout stores mark files raw.
        return Ok(raw);
    }
    encode_frame(&raw, CompressionMethod::None, 0, checksum_algo)
}

pub fn decode_marks(bytes: &[u8], checksum_algo: ChecksumAlgo) -> Result<Vec<Mark>> {
    let raw;
    let data: &[u8] = if checksum_algo == ChecksumAlgo::None {
        bytes
    } else {
        raw = decode_frame(bytes, checksum_algo)?;
        &raw
    };
    if data.len() % 16 != 0 {
        return Err(Error::LogicalError("mark file length not a multiple of 16".into()));
    }
    let mut reader = ByteReader::new(data);
    let mut marks = Vec::with_capacity(data.len() / 16);
    while reader.remaining() > 0 {
        marks.push(Mark {
            offset_in_file: reader.read_u64().unwrap(),
            offset_in_decompressed: reader.read_u64().unwrap(),
        });
    }
    Ok(marks)
}

struct CacheSlot {
    marks: Arc<Vec<Mark>>,
    weight: usize,
    last_used: u64,
}

/// Process-wide cache of parsed mark arrays, weighted by byte size.
pub struct MarkCache {
    capacity_bytes: usize,
    inner: Mutex<MarkCacheInner>,
}

#[derive(Default)]
struct MarkCacheInner {
    slots: FxHashMap<String, CacheSlot>,
    total_weight: usize,
    clock: u64,
}

impl MarkCache {
    pub fn new(capacity_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity_bytes,
            inner: Mutex::new(MarkCacheInner::default()),
        })
    }

    /// Fetch marks for `key`, loading with `load` on a miss.
    pub fn get_or_load(
        &self,
        key: &str,
        load: impl FnOnce() -> Result<Vec<Mark>>,
    ) -> Result<Arc<Vec<Mark>>> {
        {
            let mut inner = self.inner.lock().expect("mark cache lock poisoned");
            inner.clock += 1;
            let clock = inner.clock;
            if let Some(slot) = inner.slots.get_mut(key) {
                slot.last_used = clock;
                return Ok(Arc::clone(&slot.marks));
            }
        }
        let marks = Arc::new(load()?);
        let weight = marks.len() * std::mem::size_of::<Mark>();
        let mut inner = self.inner.lock().expect("mark cache lock poisoned");
        inner.clock += 1;
        let clock = inner.clock;
        inner.total_weight += weight;
        inner.slots.insert(
            key.to_string(),
            CacheSlot {
                marks: Arc::clone(&marks),
                weight,
                last_used: clock,
            },
        );
        while inner.total_weight > self.capacity_bytes && inner.slots.len() > 1 {
            let victim = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone())
                .expect("cache not empty");
            if let Some(slot) = inner.slots.remove(&victim) {
                inner.total_weight -= slot.weight;
            }
        }
        Ok(marks)
    }

    pub fn weight(&self) -> usize {
        self.inner.lock().expect("mark cache lock poisoned").total_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_round_trip_both_layouts() {
        let marks = vec![
            Mark { offset_in_file: 0, offset_in_decompressed: 0 },
            Mark { offset_in_file: 4096, offset_in_decompressed: 128 },
        ];
        for algo in [ChecksumAlgo::None, ChecksumAlgo::Crc64] {
            let encoded = encode_marks(&marks, algo).unwrap();
            assert_eq!(decode_marks(&encoded, algo).unwrap(), marks);
        }
    }

    #[test]
    fn cache_loads_once_and_evicts_lru() {
        let cache = MarkCache::new(3 * 16 + 8);
        let mut loads = 0;
        for _ in 0..3 {
            cache
                .get_or_load("a", || {
                    loads += 1;
                    Ok(vec![Mark::default(); 2])
                })
                .unwrap();
        }
        assert_eq!(loads, 1);

        // Inserting a big entry evicts the idle one.
        cache
            .get_or_load("b", || Ok(vec![Mark::default(); 3]))
            .unwrap();
        cache
            .get_or_load("a", || {
                loads += 1;
                Ok(vec![Mark::default(); 2])
            })
            .unwrap();
        assert_eq!(loads, 2);
    }
}
