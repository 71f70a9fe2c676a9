//! Per-blob space accounting and the two-phase allocation protocol.
//!
//! Writers serialize over the *selection* of a blob (the stats-map lock) but
//! proceed independently on distinct blobs (each stat's own lock). While the
//! stats-map lock is held the chosen stat's `max_caps` is decremented
//! speculatively, so concurrent choosers cannot all pile onto one blob and
//! overflow it; the decrement is corrected if the span allocation fails.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use stratum_result::{Error, Result};
use tracing::debug;

use crate::config::PageStoreConfig;
use crate::space_map::SpaceMap;
use crate::types::BlobFileId;

pub struct BlobStatInner {
    pub space_map: SpaceMap,
    pub valid_size: u64,
    /// Cached largest free span, decremented speculatively during selection.
    pub max_caps: u64,
}

pub struct BlobStat {
    pub id: BlobFileId,
    read_only: AtomicBool,
    inner: Mutex<BlobStatInner>,
}

impl BlobStat {
    fn new(id: BlobFileId, capacity: u64) -> Self {
        Self {
            id,
            read_only: AtomicBool::new(false),
            inner: Mutex::new(BlobStatInner {
                space_map: SpaceMap::new(capacity),
                valid_size: 0,
                max_caps: capacity,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, BlobStatInner> {
        self.inner.lock().expect("blob stat lock poisoned")
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    pub fn set_read_only(&self) {
        self.read_only.store(true, Ordering::Release);
    }

    /// Allocate a span of `size` bytes after a reservation made under the
    /// stats-map lock. `max_caps` was already decremented speculatively;
    /// after the real allocation we may only tighten it (other threads can
    /// hold reservations of their own, so restoring from the space map here
    /// would overstate the capability).
    pub fn alloc_pos(&self, guard: &mut BlobStatInner, size: u64) -> Result<u64> {
        let offset = match guard.space_map.alloc(size) {
            Some(offset) => offset,
            None => {
                guard.max_caps += size;
                return Err(Error::LogicalError(format!(
                    "blob {} accepted a reservation of {size} bytes but its space map \
                     refused (max_caps accounting bug)",
                    self.id
                )));
            }
        };
        guard.valid_size += size;
        guard.max_caps = guard.max_caps.min(guard.space_map.max_cap());
        Ok(offset)
    }

    /// Return a span. Returns the remaining valid size.
    pub fn remove_pos(&self, guard: &mut BlobStatInner, offset: u64, size: u64) -> Result<u64> {
        guard.space_map.free(offset, size)?;
        guard.valid_size = guard.valid_size.saturating_sub(size);
        guard.max_caps = guard.space_map.max_cap();
        Ok(guard.valid_size)
    }

    /// Recompute `max_caps` from the space map after out-of-band changes.
    pub fn recalculate(&self, guard: &mut BlobStatInner) {
        guard.max_caps = guard.space_map.max_cap();
    }
}

/// All blob stats, keyed by blob id. The map itself is guarded by a RwLock;
/// each stat carries its own mutex.
pub struct BlobStats {
    config: PageStoreConfig,
    stats: RwLock<BTreeMap<BlobFileId, Arc<BlobStat>>>,
    next_blob_id: Mutex<BlobFileId>,
}

impl BlobStats {
    pub fn new(config: PageStoreConfig) -> Self {
        Self {
            config,
            stats: RwLock::new(BTreeMap::new()),
            next_blob_id: Mutex::new(1),
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<BlobStat>> {
        self.stats
            .read()
            .expect("blob stats lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, blob_id: BlobFileId) -> Option<Arc<BlobStat>> {
        self.stats
            .read()
            .expect("blob stats lock poisoned")
            .get(&blob_id)
            .cloned()
    }

    /// Choose a writable stat with room for `size` bytes, creating a fresh
    /// blob if none fits, then allocate a span under the stat's own lock.
    /// Returns `(stat, offset)`.
    pub fn choose_and_alloc(&self, size: u64) -> Result<(Arc<BlobStat>, u64)> {
        let stat = {
            let mut stats = self.stats.write().expect("blob stats lock poisoned");
            let candidate = stats
                .values()
                .find(|stat| {
                    if stat.is_read_only() {
                        return false;
                    }
                    let mut guard = stat.lock();
                    if guard.max_caps >= size {
                        // Reserve under the stats-map lock so concurrent
                        // choosers see the reduced capability immediately.
                        guard.max_caps -= size;
                        true
                    } else {
                        false
                    }
                })
                .cloned();
            match candidate {
                Some(stat) => stat,
                None => {
                    let capacity = size.max(self.config.file_limit_size);
                    let id = {
                        let mut next = self.next_blob_id.lock().expect("next blob id poisoned");
                        let id = *next;
                        *next += 1;
                        id
                    };
                    debug!(blob_id = id, capacity, "creating blob file");
                    let stat = Arc::new(BlobStat::new(id, capacity));
                    stat.lock().max_caps -= size;
                    stats.insert(id, Arc::clone(&stat));
                    stat
                }
            }
        };

        let mut guard = stat.lock();
        let offset = stat.alloc_pos(&mut guard, size)?;
        drop(guard);
        Ok((stat, offset))
    }

    /// Restore a stat for an existing blob file discovered at startup.
    pub fn create_stat_for_restore(&self, blob_id: BlobFileId, capacity: u64) -> Arc<BlobStat> {
        let mut stats = self.stats.write().expect("blob stats lock poisoned");
        let stat = Arc::new(BlobStat::new(blob_id, capacity));
        stats.insert(blob_id, Arc::clone(&stat));
        let mut next = self.next_blob_id.lock().expect("next blob id poisoned");
        if *next <= blob_id {
            *next = blob_id + 1;
        }
        stat
    }

    /// Drop a stat from the map. The caller must not hold the stat's lock.
    pub fn erase(&self, blob_id: BlobFileId) {
        self.stats
            .write()
            .expect("blob stats lock poisoned")
            .remove(&blob_id);
    }

    /// Whether spare space justifies keeping the blob writable.
    pub fn below_reuse_threshold(&self, max_caps: u64) -> bool {
        (max_caps as f64) < self.config.file_limit_size as f64 * self.config.min_reuse_rate
    }
}
