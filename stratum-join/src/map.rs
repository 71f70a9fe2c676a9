//! Concurrent join maps: one sharded hash map per key shape.
//!
//! A map value is the list of build rows sharing the key, addressed as
//! `(block_index, row)` into the retained build blocks. Indices, never
//! pointers, so the table is safe to share across threads and outlives any
//! single builder. The `used` flag is probe-set under the shard read lock
//! via an atomic, mirroring the original's lock-free used marking.

use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use rustc_hash::{FxHashMap, FxHasher};
use stratum_result::{Error, Result};

use crate::key::{JoinKeyValue, JoinMethod, U256};

/// Reference to one build-side row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RowRef {
    pub block: u32,
    pub row: u32,
}

/// Rows sharing one key. For ANY strictness `rows.len() == 1`; for ALL the
/// vector preserves insertion order per build partition.
pub struct Slot {
    pub rows: Vec<RowRef>,
    pub used: AtomicBool,
}

impl Slot {
    fn new(row: RowRef) -> Self {
        Self {
            rows: vec![row],
            used: AtomicBool::new(false),
        }
    }

    pub fn mark_used(&self) {
        self.used.store(true, Ordering::Relaxed);
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }
}

/// CRC32-based hasher for the fixed-width fast paths.
#[derive(Default)]
pub struct Crc32Hasher {
    state: crc32fast::Hasher,
}

impl Hasher for Crc32Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.state.update(bytes);
    }

    fn finish(&self) -> u64 {
        self.state.clone().finalize() as u64
    }
}

pub type Crc32Build = BuildHasherDefault<Crc32Hasher>;
pub type FxBuild = BuildHasherDefault<FxHasher>;

/// A hash map split into power-of-two shards, each behind its own RwLock.
/// Insertions lock one shard exclusively; probes take the shard read lock.
pub struct ShardedMap<K, S: BuildHasher + Default> {
    shards: Box<[RwLock<std::collections::HashMap<K, Slot, S>>]>,
    build: S,
}

impl<K: Eq + Hash, S: BuildHasher + Default> ShardedMap<K, S> {
    pub fn new(shard_count: usize) -> Self {
        let count = shard_count.next_power_of_two().max(1);
        let shards = (0..count)
            .map(|_| RwLock::new(std::collections::HashMap::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            build: S::default(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_of(&self, key: &K) -> usize {
        (self.build.hash_one(key) as usize) & (self.shards.len() - 1)
    }

    /// Insert one row. Under ANY, an existing key keeps its first row and
    /// `false` is returned.
    pub fn insert(&self, key: K, row: RowRef, any: bool) -> bool {
        let shard = &self.shards[self.shard_of(&key)];
        let mut guard = shard.write().expect("join map shard poisoned");
        match guard.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                if any {
                    false
                } else {
                    occupied.get_mut().rows.push(row);
                    true
                }
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(row));
                true
            }
        }
    }

    /// Visit the slot for `key` under the shard read lock.
    pub fn with_slot<R>(&self, key: &K, visit: impl FnOnce(&Slot) -> R) -> Option<R> {
        let shard = &self.shards[self.shard_of(key)];
        let guard = shard.read().expect("join map shard poisoned");
        guard.get(key).map(visit)
    }

    /// Visit every slot of shard `shard_index` (non-joined scan).
    pub fn for_each_in_shard(&self, shard_index: usize, mut visit: impl FnMut(&Slot)) {
        let guard = self.shards[shard_index]
            .read()
            .expect("join map shard poisoned");
        for slot in guard.values() {
            visit(slot);
        }
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().expect("join map shard poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tagged union of the eleven map shapes. The three byte-key string
/// variants and the serialized variant share the byte-keyed map layout but
/// stay distinct tags so the chosen method is visible in logs and tests.
pub enum JoinMaps {
    Key8(ShardedMap<u8, Crc32Build>),
    Key16(ShardedMap<u16, Crc32Build>),
    Key32(ShardedMap<u32, Crc32Build>),
    Key64(ShardedMap<u64, Crc32Build>),
    KeyString(ShardedMap<Vec<u8>, FxBuild>),
    KeyStringBinary(ShardedMap<Vec<u8>, FxBuild>),
    KeyStringBinaryPadding(ShardedMap<Vec<u8>, FxBuild>),
    KeyFixedString(ShardedMap<Vec<u8>, FxBuild>),
    Keys128(ShardedMap<u128, Crc32Build>),
    Keys256(ShardedMap<U256, Crc32Build>),
    Serialized(ShardedMap<Vec<u8>, FxBuild>),
}

/// Pair a `JoinMaps` value with a rendered key and run an expression with
/// `$map` and `$key` bound to matching concrete types.
macro_rules! dispatch_join_maps {
    ($maps:expr, $key:expr, |$map:ident, $k:ident| $body:expr) => {
        match ($maps, $key) {
            (JoinMaps::Key8($map), JoinKeyValue::U8($k)) => Ok($body),
            (JoinMaps::Key16($map), JoinKeyValue::U16($k)) => Ok($body),
            (JoinMaps::Key32($map), JoinKeyValue::U32($k)) => Ok($body),
            (JoinMaps::Key64($map), JoinKeyValue::U64($k)) => Ok($body),
            (JoinMaps::Keys128($map), JoinKeyValue::U128($k)) => Ok($body),
            (JoinMaps::Keys256($map), JoinKeyValue::U256($k)) => Ok($body),
            (JoinMaps::KeyString($map), JoinKeyValue::Bytes($k))
            | (JoinMaps::KeyStringBinary($map), JoinKeyValue::Bytes($k))
            | (JoinMaps::KeyStringBinaryPadding($map), JoinKeyValue::Bytes($k))
            | (JoinMaps::KeyFixedString($map), JoinKeyValue::Bytes($k))
            | (JoinMaps::Serialized($map), JoinKeyValue::Bytes($k)) => Ok($body),
            _ => Err(Error::LogicalError(
                "join key shape does not match the chosen map".into(),
            )),
        }
    };
}

impl JoinMaps {
    pub fn for_method(method: JoinMethod, shard_count: usize) -> Self {
        match method {
            JoinMethod::Key8 => JoinMaps::Key8(ShardedMap::new(shard_count)),
            JoinMethod::Key16 => JoinMaps::Key16(ShardedMap::new(shard_count)),
            JoinMethod::Key32 => JoinMaps::Key32(ShardedMap::new(shard_count)),
            JoinMethod::Key64 => JoinMaps::Key64(ShardedMap::new(shard_count)),
            JoinMethod::KeyString => JoinMaps::KeyString(ShardedMap::new(shard_count)),
            JoinMethod::KeyStringBinary => {
                JoinMaps::KeyStringBinary(ShardedMap::new(shard_count))
            }
            JoinMethod::KeyStringBinaryPadding => {
                JoinMaps::KeyStringBinaryPadding(ShardedMap::new(shard_count))
            }
            JoinMethod::KeyFixedString => {
                JoinMaps::KeyFixedString(ShardedMap::new(shard_count))
            }
            JoinMethod::Keys128 => JoinMaps::Keys128(ShardedMap::new(shard_count)),
            JoinMethod::Keys256 => JoinMaps::Keys256(ShardedMap::new(shard_count)),
            JoinMethod::Serialized => JoinMaps::Serialized(ShardedMap::new(shard_count)),
        }
    }

    pub fn insert(&self, key: JoinKeyValue, row: RowRef, any: bool) -> Result<bool> {
        dispatch_join_maps!(self, key, |map, k| map.insert(k, row, any))
    }

    /// Rows matching `key`, marking the slot used when `mark` is set.
    pub fn lookup(&self, key: &JoinKeyValue, mark: bool) -> Result<Option<Vec<RowRef>>> {
        dispatch_join_maps!(self, key.clone(), |map, k| map.with_slot(&k, |slot| {
            if mark {
                slot.mark_used();
            }
            slot.rows.clone()
        }))
    }

    /// Mark `key`'s slot used without reading it.
    pub fn mark_used(&self, key: &JoinKeyValue) -> Result<()> {
        dispatch_join_maps!(self, key.clone(), |map, k| {
            map.with_slot(&k, |slot| slot.mark_used());
        })
    }

    pub fn shard_count(&self) -> usize {
        match self {
            JoinMaps::Key8(m) => m.shard_count(),
            JoinMaps::Key16(m) => m.shard_count(),
            JoinMaps::Key32(m) => m.shard_count(),
            JoinMaps::Key64(m) => m.shard_count(),
            JoinMaps::KeyString(m)
            | JoinMaps::KeyStringBinary(m)
            | JoinMaps::KeyStringBinaryPadding(m)
            | JoinMaps::KeyFixedString(m)
            | JoinMaps::Serialized(m) => m.shard_count(),
            JoinMaps::Keys128(m) => m.shard_count(),
            JoinMaps::Keys256(m) => m.shard_count(),
        }
    }

    /// Visit every slot in one shard.
    pub fn for_each_in_shard(&self, shard: usize, visit: impl FnMut(&Slot)) {
        match self {
            JoinMaps::Key8(m) => m.for_each_in_shard(shard, visit),
            JoinMaps::Key16(m) => m.for_each_in_shard(shard, visit),
            JoinMaps::Key32(m) => m.for_each_in_shard(shard, visit),
            JoinMaps::Key64(m) => m.for_each_in_shard(shard, visit),
            JoinMaps::KeyString(m)
            | JoinMaps::KeyStringBinary(m)
            | JoinMaps::KeyStringBinaryPadding(m)
            | JoinMaps::KeyFixedString(m)
            | JoinMaps::Serialized(m) => m.for_each_in_shard(shard, visit),
            JoinMaps::Keys128(m) => m.for_each_in_shard(shard, visit),
            JoinMaps::Keys256(m) => m.for_each_in_shard(shard, visit),
        }
    }

    /// Total number of distinct keys.
    pub fn total_keys(&self) -> usize {
        match self {
            JoinMaps::Key8(m) => m.len(),
            JoinMaps::Key16(m) => m.len(),
            JoinMaps::Key32(m) => m.len(),
            JoinMaps::Key64(m) => m.len(),
            JoinMaps::KeyString(m)
            | JoinMaps::KeyStringBinary(m)
            | JoinMaps::KeyStringBinaryPadding(m)
            | JoinMaps::KeyFixedString(m)
            | JoinMaps::Serialized(m) => m.len(),
            JoinMaps::Keys128(m) => m.len(),
            JoinMaps::Keys256(m) => m.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(block: u32, row: u32) -> RowRef {
        RowRef { block, row }
    }

    #[test]
    fn all_appends_preserving_order() {
        let maps = JoinMaps::for_method(JoinMethod::Key64, 4);
        assert!(maps.insert(JoinKeyValue::U64(7), row(0, 0), false).unwrap());
        assert!(maps.insert(JoinKeyValue::U64(7), row(0, 3), false).unwrap());
        assert!(maps.insert(JoinKeyValue::U64(9), row(1, 1), false).unwrap());

        let rows = maps.lookup(&JoinKeyValue::U64(7), false).unwrap().unwrap();
        assert_eq!(rows, vec![row(0, 0), row(0, 3)]);
        assert_eq!(maps.total_keys(), 2);
    }

    #[test]
    fn any_keeps_first_row() {
        let maps = JoinMaps::for_method(JoinMethod::Key32, 4);
        assert!(maps.insert(JoinKeyValue::U32(1), row(0, 0), true).unwrap());
        assert!(!maps.insert(JoinKeyValue::U32(1), row(0, 9), true).unwrap());
        let rows = maps.lookup(&JoinKeyValue::U32(1), false).unwrap().unwrap();
        assert_eq!(rows, vec![row(0, 0)]);
    }

    #[test]
    fn mismatched_key_shape_is_rejected() {
        let maps = JoinMaps::for_method(JoinMethod::Key64, 4);
        assert!(maps
            .insert(JoinKeyValue::Bytes(vec![1]), row(0, 0), false)
            .is_err());
    }

    #[test]
    fn used_marking_via_lookup() {
        let maps = JoinMaps::for_method(JoinMethod::KeyString, 4);
        maps.insert(JoinKeyValue::Bytes(b"k".to_vec()), row(0, 0), false)
            .unwrap();
        maps.lookup(&JoinKeyValue::Bytes(b"k".to_vec()), true)
            .unwrap();

        let mut used = 0;
        for shard in 0..maps.shard_count() {
            maps.for_each_in_shard(shard, |slot| {
                if slot.is_used() {
                    used += 1;
                }
            });
        }
        assert_eq!(used, 1);
    }
}
