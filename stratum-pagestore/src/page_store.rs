//! PageStore facade wiring the blob store and the MVCC directory together.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use stratum_common::file_provider::FileProvider;
use stratum_common::CancelToken;
use stratum_result::{Error, Result};
use tracing::{debug, info};

use crate::blob_store::{BlobStore, FieldReadRequest, PageMap};
use crate::config::PageStoreConfig;
use crate::directory::{PageDirectory, Snapshot};
use crate::types::{PageId, Sequence};
use crate::write_batch::WriteBatch;

pub struct PageStore {
    blob_store: BlobStore,
    directory: PageDirectory,
}

impl PageStore {
    pub fn open(
        provider: Arc<dyn FileProvider>,
        path: impl AsRef<Path>,
        config: PageStoreConfig,
    ) -> Result<Self> {
        let blob_store = BlobStore::new(provider, path.as_ref().to_path_buf(), config)?;
        Ok(Self {
            blob_store,
            directory: PageDirectory::new(),
        })
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.blob_store
    }

    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    /// Persist a batch and commit its directory edit. Pages of the batch
    /// become visible together, never partially.
    pub fn write(&self, batch: WriteBatch, cancel: &CancelToken) -> Result<Sequence> {
        let edit = self.blob_store.write(batch, cancel)?;
        self.directory.apply(edit)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.directory.snapshot()
    }

    /// Read whole pages under a snapshot.
    pub fn read(
        &self,
        page_ids: &[PageId],
        snap: &Snapshot,
        cancel: &CancelToken,
    ) -> Result<PageMap> {
        let entries = self.directory.get_many(page_ids, snap)?;
        let reads: Vec<_> = page_ids.iter().copied().zip(entries).collect();
        self.blob_store.read(reads, cancel)
    }

    /// Read selected fields of pages under a snapshot.
    pub fn read_fields(
        &self,
        requests: &[(PageId, Vec<usize>)],
        snap: &Snapshot,
        cancel: &CancelToken,
    ) -> Result<PageMap> {
        let mut reads = Vec::with_capacity(requests.len());
        for (page_id, fields) in requests {
            let entry = self.directory.get(*page_id, snap).ok_or_else(|| {
                Error::NotFound(format!("page {page_id} at seq {}", snap.sequence()))
            })?;
            reads.push(FieldReadRequest {
                page_id: *page_id,
                entry,
                fields: fields.clone(),
            });
        }
        self.blob_store.read_fields(reads, cancel)
    }

    /// Run one full GC cycle:
    /// 1. drop directory versions nothing can observe, retracting their space
    /// 2. decide which blobs deserve a rewrite
    /// 3. copy their live pages into fresh blobs and rebind the directory
    ///
    /// Returns the number of migrated entries.
    pub fn gc(&self, cancel: &CancelToken) -> Result<usize> {
        let retracted = self.directory.gc_versions();
        if !retracted.is_empty() {
            debug!(count = retracted.len(), "retracting superseded entries");
            self.blob_store.remove(&retracted)?;
        }

        let blobs_to_gc = self.blob_store.gc_scan()?;
        if blobs_to_gc.is_empty() {
            return Ok(0);
        }

        let live = self.directory.live_entries();
        let mut entries_per_blob: BTreeMap<_, Vec<_>> = BTreeMap::new();
        let mut total_size = 0u64;
        for blob_id in &blobs_to_gc {
            if let Some(entries) = live.get(blob_id) {
                total_size += entries.iter().map(|(_, _, e)| e.size).sum::<u64>();
                entries_per_blob.insert(*blob_id, entries.clone());
            }
        }
        if total_size == 0 {
            // Blobs were selected but hold no live data; their spans drain
            // through remove() as versions retire.
            return Ok(0);
        }

        let migrated: usize = entries_per_blob.values().map(Vec::len).sum();
        info!(blobs = blobs_to_gc.len(), migrated, "page store GC rewriting blobs");
        let edit = self.blob_store.gc(&entries_per_blob, total_size, cancel)?;
        self.directory.apply(edit)?;

        // The old copies are no longer referenced by any version.
        let old_entries: Vec<_> = entries_per_blob
            .into_values()
            .flatten()
            .map(|(_, _, entry)| entry)
            .collect();
        self.blob_store.remove(&old_entries)?;
        Ok(migrated)
    }
}
