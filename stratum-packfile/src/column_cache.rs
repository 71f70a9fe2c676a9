//! Pack-granular cache for the hot implicit columns (handle, version).

use std::ops::Range;
use std::sync::{Arc, Mutex};

use arrow::array::{Array, ArrayRef};
use rustc_hash::FxHashMap;

use crate::format::ColId;

/// How one segment of a pack range should be satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Copy the packs from the cache.
    Memory,
    /// Read the packs from disk (and insert them back afterwards).
    Disk,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    file_id: String,
    col_id: ColId,
    pack_id: usize,
}

struct CacheSlot {
    array: ArrayRef,
    weight: usize,
    last_used: u64,
}

#[derive(Default)]
struct ColumnCacheInner {
    slots: FxHashMap<CacheKey, CacheSlot>,
    total_weight: usize,
    clock: u64,
}

/// Size-weighted pack cache shared across readers of the same files.
pub struct ColumnCache {
    capacity_bytes: usize,
    inner: Mutex<ColumnCacheInner>,
}

impl ColumnCache {
    pub fn new(capacity_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity_bytes,
            inner: Mutex::new(ColumnCacheInner::default()),
        })
    }

    /// Segment `[start_pack, start_pack + count)` into maximal runs served
    /// from memory vs disk.
    pub fn read_strategy(
        &self,
        file_id: &str,
        col_id: ColId,
        start_pack: usize,
        count: usize,
    ) -> Vec<(Range<usize>, CacheStrategy)> {
        let inner = self.inner.lock().expect("column cache lock poisoned");
        let mut out: Vec<(Range<usize>, CacheStrategy)> = Vec::new();
        for pack_id in start_pack..start_pack + count {
            let key = CacheKey {
                file_id: file_id.to_string(),
                col_id,
                pack_id,
            };
            let strategy = if inner.slots.contains_key(&key) {
                CacheStrategy::Memory
            } else {
                CacheStrategy::Disk
            };
            match out.last_mut() {
                Some((range, last)) if *last == strategy && range.end == pack_id => {
                    range.end = pack_id + 1;
                }
                _ => out.push((pack_id..pack_id + 1, strategy)),
            }
        }
        out
    }

    pub fn get(&self, file_id: &str, col_id: ColId, pack_id: usize) -> Option<ArrayRef> {
        let mut inner = self.inner.lock().expect("column cache lock poisoned");
        inner.clock += 1;
        let clock = inner.clock;
        let slot = inner.slots.get_mut(&CacheKey {
            file_id: file_id.to_string(),
            col_id,
            pack_id,
        })?;
        slot.last_used = clock;
        Some(Arc::clone(&slot.array))
    }

    pub fn put(&self, file_id: &str, col_id: ColId, pack_id: usize, array: ArrayRef) {
        let weight = array.get_array_memory_size();
        let mut inner = self.inner.lock().expect("column cache lock poisoned");
        inner.clock += 1;
        let clock = inner.clock;
        let key = CacheKey {
            file_id: file_id.to_string(),
            col_id,
            pack_id,
        };
        if let Some(old) = inner.slots.insert(
            key,
            CacheSlot {
                array,
                weight,
                last_used: clock,
            },
        ) {
            inner.total_weight -= old.weight;
        }
        inner.total_weight += weight;
        while inner.total_weight > self.capacity_bytes && inner.slots.len() > 1 {
            let victim = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone())
                .expect("cache not empty");
            if let Some(slot) = inner.slots.remove(&victim) {
                inner.total_weight -= slot.weight;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;

    #[test]
    fn strategy_segments_runs() {
        let cache = ColumnCache::new(1 << 20);
        let array: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3]));
        cache.put("f", -1, 1, Arc::clone(&array));
        cache.put("f", -1, 2, Arc::clone(&array));
        cache.put("f", -1, 4, array);

        let strategy = cache.read_strategy("f", -1, 0, 6);
        assert_eq!(
            strategy,
            vec![
                (0..1, CacheStrategy::Disk),
                (1..3, CacheStrategy::Memory),
                (3..4, CacheStrategy::Disk),
                (4..5, CacheStrategy::Memory),
                (5..6, CacheStrategy::Disk),
            ]
        );
    }

    #[test]
    fn get_returns_cached_array() {
        let cache = ColumnCache::new(1 << 20);
        let array: ArrayRef = Arc::new(Int64Array::from(vec![7, 8]));
        cache.put("f", -2, 0, Arc::clone(&array));
        let got = cache.get("f", -2, 0).unwrap();
        assert_eq!(got.as_ref(), array.as_ref());
        assert!(cache.get("f", -2, 1).is_none());
        assert!(cache.get("g", -2, 0).is_none());
    }
}
