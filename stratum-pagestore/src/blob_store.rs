//! Blob layer: packs write batches into blob-file allocations, reads pages
//! back with checksum verification, and migrates live pages out of
//! fragmented blobs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use stratum_common::checksum::crc64;
use stratum_common::file_provider::FileProvider;
use stratum_common::{CancelToken, IoLimiter};
use stratum_result::{Error, Result};
use tracing::{debug, error, info, trace};

use crate::blob_file::BlobFile;
use crate::blob_stats::{BlobStat, BlobStats};
use crate::config::PageStoreConfig;
use crate::edit::PageEdit;
use crate::entry::PageEntry;
use crate::page::Page;
use crate::types::{BlobFileId, PageId, Sequence, INVALID_BLOB_ID};
use crate::write_batch::{WriteBatch, WriteItem};

/// Checksum verification on read is always on.
const CHECKSUM_ON_READ: bool = true;

pub type PageMap = FxHashMap<PageId, Page>;

/// Read request for a subset of one entry's fields.
#[derive(Clone, Debug)]
pub struct FieldReadRequest {
    pub page_id: PageId,
    pub entry: PageEntry,
    pub fields: Vec<usize>,
}

pub struct BlobStore {
    config: PageStoreConfig,
    parent: PathBuf,
    provider: Arc<dyn FileProvider>,
    stats: BlobStats,
    blob_files: Mutex<FxHashMap<BlobFileId, Arc<BlobFile>>>,
    read_limiter: Option<Arc<IoLimiter>>,
    write_limiter: Option<Arc<IoLimiter>>,
}

impl BlobStore {
    pub fn new(
        provider: Arc<dyn FileProvider>,
        parent: impl Into<PathBuf>,
        config: PageStoreConfig,
    ) -> Result<Self> {
        let parent = parent.into();
        provider.create_dir_all(&parent)?;
        Ok(Self {
            stats: BlobStats::new(config.clone()),
            config,
            parent,
            provider,
            blob_files: Mutex::new(FxHashMap::default()),
            read_limiter: None,
            write_limiter: None,
        })
    }

    pub fn with_limiters(
        mut self,
        read: Option<Arc<IoLimiter>>,
        write: Option<Arc<IoLimiter>>,
    ) -> Self {
        self.read_limiter = read;
        self.write_limiter = write;
        self
    }

    pub fn stats(&self) -> &BlobStats {
        &self.stats
    }

    fn blob_file(&self, blob_id: BlobFileId) -> Result<Arc<BlobFile>> {
        let mut files = self.blob_files.lock().expect("blob files lock poisoned");
        if let Some(file) = files.get(&blob_id) {
            return Ok(Arc::clone(file));
        }
        let file = Arc::new(BlobFile::open(
            Arc::clone(&self.provider),
            &self.parent,
            blob_id,
        )?);
        files.insert(blob_id, Arc::clone(&file));
        Ok(file)
    }

    /// Re-register blob files and used spans for entries recovered from a
    /// persisted directory (restart path).
    pub fn restore_entries(&self, entries: &[(PageId, PageEntry)]) -> Result<()> {
        let mut per_blob: BTreeMap<BlobFileId, Vec<&PageEntry>> = BTreeMap::new();
        for (_, entry) in entries {
            if entry.is_local() && entry.size > 0 {
                per_blob.entry(entry.blob_id).or_default().push(entry);
            }
        }
        for (blob_id, blob_entries) in per_blob {
            let max_end = blob_entries
                .iter()
                .map(|e| e.offset + e.total_size())
                .max()
                .unwrap_or(0);
            let capacity = max_end.max(self.config.file_limit_size);
            let stat = self.stats.create_stat_for_restore(blob_id, capacity);
            let mut guard = stat.lock();
            for entry in blob_entries {
                guard.space_map.mark_used(entry.offset, entry.total_size())?;
                guard.valid_size += entry.total_size();
            }
            stat.recalculate(&mut guard);
        }
        Ok(())
    }

    /// Persist a write batch's payloads, returning the directory edit.
    pub fn write(&self, batch: WriteBatch, cancel: &CancelToken) -> Result<PageEdit> {
        let total_size = batch.total_data_size();
        if total_size == 0 {
            return self.write_no_data(batch);
        }
        if total_size > self.config.file_limit_size {
            return self.write_large(batch, cancel);
        }
        self.write_packed(batch, total_size, cancel)
    }

    fn write_no_data(&self, batch: WriteBatch) -> Result<PageEdit> {
        let mut edit = PageEdit::new();
        for item in batch.into_items() {
            match item {
                WriteItem::PutRemote {
                    page_id,
                    location,
                    tag,
                    field_offsets,
                } => {
                    let entry = PageEntry {
                        blob_id: INVALID_BLOB_ID,
                        tag,
                        size: location.size,
                        field_offsets: field_offsets.into_iter().map(|o| (o, 0)).collect(),
                        remote: Some(location),
                        ..Default::default()
                    };
                    edit.put(page_id, entry);
                }
                WriteItem::PutExternal { page_id } => edit.put_external(page_id),
                WriteItem::Ref { page_id, origin } => edit.reference(page_id, origin),
                WriteItem::Del { page_id } => edit.del(page_id),
                WriteItem::Put { .. } | WriteItem::UpdateRemote { .. } => {
                    return Err(Error::LogicalError(
                        "write batch has total size 0 while a data-carrying item exists".into(),
                    ));
                }
            }
        }
        Ok(edit)
    }

    /// Batch fits one allocation: serialize every payload into one buffer,
    /// reserve once, write once. Alignment padding is absorbed into the last
    /// data-carrying entry's `padded_size`.
    fn write_packed(
        &self,
        batch: WriteBatch,
        total_size: u64,
        cancel: &CancelToken,
    ) -> Result<PageEdit> {
        let align = self.config.block_alignment_bytes;
        let replenish = if align != 0 && total_size % align != 0 {
            align - total_size % align
        } else {
            0
        };
        let allocated_size = total_size + replenish;

        let (stat, offset_in_file) = self.stats.choose_and_alloc(allocated_size)?;
        let mut buffer = Vec::with_capacity(total_size as usize);
        let mut edit = PageEdit::new();
        let mut offset_in_alloc = 0u64;

        for item in batch.into_items() {
            match item {
                WriteItem::Put {
                    page_id,
                    bytes,
                    tag,
                    field_offsets,
                } => {
                    let size = bytes.len() as u64;
                    let mut entry = PageEntry {
                        blob_id: stat.id,
                        offset: offset_in_file + offset_in_alloc,
                        size,
                        tag,
                        checksum: crc64(&bytes),
                        field_offsets: field_checksums(&bytes, &field_offsets),
                        ..Default::default()
                    };
                    offset_in_alloc += size;
                    if offset_in_alloc == total_size {
                        entry.padded_size = replenish;
                    }
                    entry.validate()?;
                    buffer.extend_from_slice(&bytes);
                    edit.put(page_id, entry);
                }
                WriteItem::UpdateRemote {
                    page_id,
                    bytes,
                    tag,
                } => {
                    let size = bytes.len() as u64;
                    let mut entry = PageEntry {
                        blob_id: stat.id,
                        offset: offset_in_file + offset_in_alloc,
                        size,
                        tag,
                        checksum: crc64(&bytes),
                        ..Default::default()
                    };
                    offset_in_alloc += size;
                    if offset_in_alloc == total_size {
                        entry.padded_size = replenish;
                    }
                    buffer.extend_from_slice(&bytes);
                    edit.update_remote(page_id, entry);
                }
                WriteItem::PutRemote {
                    page_id,
                    location,
                    tag,
                    field_offsets,
                } => {
                    let entry = PageEntry {
                        blob_id: INVALID_BLOB_ID,
                        tag,
                        size: location.size,
                        field_offsets: field_offsets.into_iter().map(|o| (o, 0)).collect(),
                        remote: Some(location),
                        ..Default::default()
                    };
                    edit.put(page_id, entry);
                }
                WriteItem::PutExternal { page_id } => edit.put_external(page_id),
                WriteItem::Ref { page_id, origin } => edit.reference(page_id, origin),
                WriteItem::Del { page_id } => edit.del(page_id),
            }
        }

        if buffer.len() as u64 != total_size {
            self.remove_pos(stat.id, offset_in_file, allocated_size)?;
            return Err(Error::LogicalError(format!(
                "write batch total size mismatch: expected {total_size}, serialized {}",
                buffer.len()
            )));
        }

        let file = self.blob_file(stat.id)?;
        if let Err(e) = file.write(&buffer, offset_in_file, self.write_limiter.as_deref(), cancel) {
            self.remove_pos(stat.id, offset_in_file, allocated_size)?;
            error!(
                blob_id = stat.id,
                offset = offset_in_file,
                size = total_size,
                "packed blob write failed"
            );
            return Err(e);
        }
        trace!(
            blob_id = stat.id,
            offset = offset_in_file,
            size = total_size,
            padded = replenish,
            "packed blob write done"
        );
        Ok(edit)
    }

    /// Batch exceeds one blob allocation: each payload allocates and writes
    /// independently, no padding.
    fn write_large(&self, batch: WriteBatch, cancel: &CancelToken) -> Result<PageEdit> {
        let mut edit = PageEdit::new();
        for item in batch.into_items() {
            match item {
                WriteItem::Put {
                    page_id,
                    bytes,
                    tag,
                    field_offsets,
                } => {
                    let entry =
                        self.write_single(&bytes, tag, field_checksums(&bytes, &field_offsets), cancel)?;
                    edit.put(page_id, entry);
                }
                WriteItem::UpdateRemote {
                    page_id,
                    bytes,
                    tag,
                } => {
                    let entry = self.write_single(&bytes, tag, Vec::new(), cancel)?;
                    edit.update_remote(page_id, entry);
                }
                WriteItem::PutRemote {
                    page_id,
                    location,
                    tag,
                    field_offsets,
                } => {
                    let entry = PageEntry {
                        blob_id: INVALID_BLOB_ID,
                        tag,
                        size: location.size,
                        field_offsets: field_offsets.into_iter().map(|o| (o, 0)).collect(),
                        remote: Some(location),
                        ..Default::default()
                    };
                    edit.put(page_id, entry);
                }
                WriteItem::PutExternal { page_id } => edit.put_external(page_id),
                WriteItem::Ref { page_id, origin } => edit.reference(page_id, origin),
                WriteItem::Del { page_id } => edit.del(page_id),
            }
        }
        Ok(edit)
    }

    /// Allocate, checksum, and write one standalone payload.
    fn write_single(
        &self,
        bytes: &[u8],
        tag: u64,
        field_offsets: Vec<(u64, u64)>,
        cancel: &CancelToken,
    ) -> Result<PageEntry> {
        let size = bytes.len() as u64;
        let (stat, offset) = self.stats.choose_and_alloc(size)?;
        let entry = PageEntry {
            blob_id: stat.id,
            offset,
            size,
            tag,
            checksum: crc64(bytes),
            field_offsets,
            ..Default::default()
        };
        entry.validate()?;
        let file = self.blob_file(stat.id)?;
        if let Err(e) = file.write(bytes, offset, self.write_limiter.as_deref(), cancel) {
            self.remove_pos(stat.id, offset, size)?;
            error!(
                blob_id = stat.id,
                offset, size, "blob write failed in large batch"
            );
            return Err(e);
        }
        Ok(entry)
    }

    /// Batched page read. All pages share one backing buffer.
    pub fn read(
        &self,
        mut entries: Vec<(PageId, PageEntry)>,
        cancel: &CancelToken,
    ) -> Result<PageMap> {
        if entries.is_empty() {
            return Ok(PageMap::default());
        }
        // Sort by position for sequential disk access.
        entries.sort_by_key(|(_, entry)| (entry.blob_id, entry.offset));

        let buf_size: usize = entries.iter().map(|(_, e)| e.size as usize).sum();
        let mut page_map = PageMap::default();
        if buf_size == 0 {
            for (page_id, _) in entries {
                page_map.insert(page_id, Page::new(page_id, Bytes::new()));
            }
            return Ok(page_map);
        }

        let mut buffer = vec![0u8; buf_size];
        let mut ranges = Vec::with_capacity(entries.len());
        let mut pos = 0usize;
        for (page_id, entry) in &entries {
            let size = entry.size as usize;
            if size == 0 || !entry.is_local() {
                ranges.push((*page_id, pos, 0));
                continue;
            }
            let slice = &mut buffer[pos..pos + size];
            let file = self.blob_file(entry.blob_id)?;
            file.read(slice, entry.offset, self.read_limiter.as_deref(), cancel)
                .map_err(|e| e.context(format!("page_id={page_id}")))?;
            if CHECKSUM_ON_READ && entry.size != 0 {
                let actual = crc64(slice);
                if actual != entry.checksum {
                    return Err(Error::ChecksumMismatch(format!(
                        "page_id={page_id} blob_id={} offset={} expected={:#x} actual={:#x}",
                        entry.blob_id, entry.offset, entry.checksum, actual
                    )));
                }
            }
            ranges.push((*page_id, pos, size));
            pos += size;
        }

        let shared = Bytes::from(buffer);
        for ((_, entry), (page_id, begin, size)) in entries.iter().zip(ranges) {
            let mut page = Page::new(page_id, shared.slice(begin..begin + size));
            page.field_offsets = entry
                .field_offsets
                .iter()
                .enumerate()
                .map(|(index, &(offset, _))| (index, offset as usize))
                .collect();
            page_map.insert(page_id, page);
        }
        Ok(page_map)
    }

    /// Read only the requested fields of each entry. Field checksums are
    /// verified individually, so corruption in one field fails only reads
    /// that cover it.
    pub fn read_fields(
        &self,
        mut reads: Vec<FieldReadRequest>,
        cancel: &CancelToken,
    ) -> Result<PageMap> {
        if reads.is_empty() {
            return Ok(PageMap::default());
        }
        reads.sort_by_key(|r| (r.entry.blob_id, r.entry.offset));
        for read in &mut reads {
            read.fields.sort_unstable();
        }

        let mut buf_size = 0usize;
        for read in &reads {
            for &field in &read.fields {
                buf_size += read.entry.field_size(field)? as usize;
            }
        }
        let mut page_map = PageMap::default();
        if buf_size == 0 {
            for read in reads {
                page_map.insert(read.page_id, Page::new(read.page_id, Bytes::new()));
            }
            return Ok(page_map);
        }

        let mut buffer = vec![0u8; buf_size];
        let mut layouts = Vec::with_capacity(reads.len());
        let mut pos = 0usize;
        for read in &reads {
            let file = self.blob_file(read.entry.blob_id)?;
            let page_begin = pos;
            let mut field_offsets = Vec::with_capacity(read.fields.len());
            for &field in &read.fields {
                let (begin, end) = read.entry.field_range(field)?;
                let size = (end - begin) as usize;
                let slice = &mut buffer[pos..pos + size];
                file.read(
                    slice,
                    read.entry.offset + begin,
                    self.read_limiter.as_deref(),
                    cancel,
                )
                .map_err(|e| e.context(format!("page_id={} field={field}", read.page_id)))?;
                if CHECKSUM_ON_READ && read.entry.size != 0 {
                    let expected = read.entry.field_checksum(field);
                    let actual = crc64(slice);
                    if actual != expected {
                        return Err(Error::ChecksumMismatch(format!(
                            "page_id={} field={field} blob_id={} field_offset={begin} \
                             expected={expected:#x} actual={actual:#x}",
                            read.page_id, read.entry.blob_id
                        )));
                    }
                }
                field_offsets.push((field, pos - page_begin));
                pos += size;
            }
            layouts.push((read.page_id, page_begin, pos - page_begin, field_offsets));
        }

        let shared = Bytes::from(buffer);
        for (page_id, begin, size, field_offsets) in layouts {
            let mut page = Page::new(page_id, shared.slice(begin..begin + size));
            page.field_offsets = field_offsets;
            page_map.insert(page_id, page);
        }
        Ok(page_map)
    }

    /// Retract the space held by entries that no longer have any reference.
    pub fn remove(&self, entries: &[PageEntry]) -> Result<()> {
        let mut touched = std::collections::BTreeSet::new();
        for entry in entries {
            if !entry.is_local() || entry.size == 0 {
                continue;
            }
            touched.insert(entry.blob_id);
            self.remove_pos(entry.blob_id, entry.offset, entry.total_size())
                .map_err(|e| e.context(format!("while removing entry at {}", entry.offset)))?;
        }
        for blob_id in touched {
            if let Some(stat) = self.stats.get(blob_id) {
                let mut guard = stat.lock();
                stat.recalculate(&mut guard);
                trace!(
                    blob_id,
                    max_caps = guard.max_caps,
                    valid_size = guard.valid_size,
                    "blob capability recalculated"
                );
            }
        }
        Ok(())
    }

    /// Free one span, removing the blob entirely if it is read-only and now
    /// empty. Blob-file removal happens only after releasing the per-stat
    /// lock, under the stats-map lock, to avoid lock-order inversion.
    fn remove_pos(&self, blob_id: BlobFileId, offset: u64, size: u64) -> Result<()> {
        let Some(stat) = self.stats.get(blob_id) else {
            // Blob already removed; nothing to retract.
            return Ok(());
        };
        let remove_file = {
            let mut guard = stat.lock();
            let remaining = stat.remove_pos(&mut guard, offset, size)?;
            stat.is_read_only() && remaining == 0
        };
        if !remove_file {
            return Ok(());
        }
        info!(blob_id, "removing empty read-only blob file");
        self.stats.erase(blob_id);
        let file = {
            let mut files = self.blob_files.lock().expect("blob files lock poisoned");
            files.remove(&blob_id)
        };
        if let Some(file) = file {
            file.remove()?;
        } else {
            // Never opened; remove from disk directly if present.
            let path = self.parent.join(format!("blob_{blob_id}"));
            if self.provider.exists(&path) {
                self.provider.remove(&path)?;
            }
        }
        Ok(())
    }

    /// Decide which blobs to reclaim. Truncates trailing free space as a side
    /// effect and flags heavily fragmented blobs read-only.
    pub fn gc_scan(&self) -> Result<Vec<BlobFileId>> {
        let mut need_gc = Vec::new();
        for stat in self.stats.snapshot() {
            if stat.is_read_only() {
                trace!(blob_id = stat.id, "blob is read-only, already queued");
                continue;
            }
            let mut guard = stat.lock();
            let boundary = guard.space_map.used_boundary();

            if boundary == 0 {
                if guard.valid_size != 0 {
                    return Err(Error::LogicalError(format!(
                        "blob {} is empty but valid size is {}",
                        stat.id, guard.valid_size
                    )));
                }
                // The on-disk file may still hold stale bytes; shrink it so
                // the space gets reused. The space map keeps its capacity.
                let file = self.blob_file(stat.id)?;
                info!(blob_id = stat.id, "truncating empty blob file to zero");
                file.truncate(0)?;
                continue;
            }

            let valid_rate = guard.valid_size as f64 / boundary as f64;
            if valid_rate > 1.0 {
                error!(
                    blob_id = stat.id,
                    valid_rate,
                    valid_size = guard.valid_size,
                    boundary,
                    "invalid valid rate, skipping blob"
                );
                debug_assert!(false, "valid rate exceeds 1.0");
                continue;
            }

            if valid_rate <= self.config.heavy_gc_valid_rate {
                debug!(blob_id = stat.id, valid_rate, "blob selected for heavy GC");
                stat.set_read_only();
                need_gc.push(stat.id);
            } else if self.stats.below_reuse_threshold(guard.max_caps) {
                // Not worth writing into anymore; let it drain via deletes.
                debug!(blob_id = stat.id, "blob below reuse threshold, sealing");
                stat.set_read_only();
            }

            // Reclaim trailing disk space past the last used byte. The space
            // map keeps its capacity; only the on-disk file shrinks.
            let total = guard.space_map.total_size();
            if boundary != total {
                let file = self.blob_file(stat.id)?;
                trace!(
                    blob_id = stat.id,
                    from = total,
                    to = boundary,
                    "truncating blob trailing space"
                );
                file.truncate(boundary)?;
            }
        }
        Ok(need_gc)
    }

    /// Copy live pages out of reclaimed blobs into fresh allocations.
    ///
    /// One buffer of `min(total_size, file_limit_size)` (grown to the largest
    /// single entry) is reused across allocations. Every allocation made here
    /// is freed again if any write fails.
    pub fn gc(
        &self,
        entries_per_blob: &BTreeMap<BlobFileId, Vec<(PageId, Sequence, PageEntry)>>,
        total_size: u64,
        cancel: &CancelToken,
    ) -> Result<PageEdit> {
        if total_size == 0 {
            return Err(Error::LogicalError(
                "blob GC invoked with nothing to migrate".into(),
            ));
        }
        info!(total_size, "blob GC migrating live pages into new blobs");

        let mut alloc_size = self.config.file_limit_size;
        if total_size > alloc_size {
            let biggest = entries_per_blob
                .values()
                .flatten()
                .map(|(_, _, entry)| entry.size)
                .max()
                .unwrap_or(0);
            alloc_size = alloc_size.max(biggest);
        } else {
            alloc_size = total_size;
        }

        let mut edit = PageEdit::new();
        // (blob_id, offset, size) of every span allocated by this GC run.
        let mut allocated: Vec<(BlobFileId, u64, u64)> = Vec::new();
        let mut buffer = vec![0u8; alloc_size as usize];

        let result = (|| -> Result<()> {
            let mut remaining = total_size - alloc_size;
            let (mut stat, mut file_offset) = self.stats.choose_and_alloc(alloc_size)?;
            allocated.push((stat.id, file_offset, alloc_size));
            let mut cur_alloc_size = alloc_size;
            let mut offset_in_buf = 0u64;

            for (&old_blob_id, entries) in entries_per_blob {
                let old_file = self.blob_file(old_blob_id)?;
                for (page_id, version, entry) in entries {
                    if offset_in_buf + entry.size > cur_alloc_size {
                        // Return the unused tail of the current allocation,
                        // flush what we have, and start a fresh allocation.
                        if offset_in_buf != cur_alloc_size {
                            self.remove_pos(
                                stat.id,
                                file_offset + offset_in_buf,
                                cur_alloc_size - offset_in_buf,
                            )?;
                            let last = allocated.last_mut().expect("allocation list empty");
                            last.2 = offset_in_buf;
                        }
                        remaining += cur_alloc_size - offset_in_buf;

                        let out_file = self.blob_file(stat.id)?;
                        out_file.write(
                            &buffer[..offset_in_buf as usize],
                            file_offset,
                            self.write_limiter.as_deref(),
                            cancel,
                        )?;
                        debug!(
                            blob_id = stat.id,
                            offset = file_offset,
                            size = offset_in_buf,
                            "blob GC wrote partial batch"
                        );

                        let next_alloc = remaining.min(alloc_size).max(entry.size);
                        remaining = remaining.saturating_sub(next_alloc);
                        let (next_stat, next_offset) = self.stats.choose_and_alloc(next_alloc)?;
                        allocated.push((next_stat.id, next_offset, next_alloc));
                        stat = next_stat;
                        file_offset = next_offset;
                        cur_alloc_size = next_alloc;
                        offset_in_buf = 0;
                    }

                    let dst = &mut buffer
                        [offset_in_buf as usize..(offset_in_buf + entry.size) as usize];
                    old_file.read(dst, entry.offset, self.read_limiter.as_deref(), cancel)?;

                    let mut new_entry = entry.clone();
                    new_entry.blob_id = stat.id;
                    new_entry.offset = file_offset + offset_in_buf;
                    new_entry.padded_size = 0;
                    offset_in_buf += entry.size;
                    edit.upsert(*page_id, *version, new_entry);
                }
            }

            // Return the final unused tail and flush the remainder.
            if offset_in_buf != cur_alloc_size {
                self.remove_pos(
                    stat.id,
                    file_offset + offset_in_buf,
                    cur_alloc_size - offset_in_buf,
                )?;
                let last = allocated.last_mut().expect("allocation list empty");
                last.2 = offset_in_buf;
            }
            if offset_in_buf != 0 {
                let out_file = self.blob_file(stat.id)?;
                out_file.write(
                    &buffer[..offset_in_buf as usize],
                    file_offset,
                    self.write_limiter.as_deref(),
                    cancel,
                )?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            error!("blob GC failed, rolling back allocations");
            for (blob_id, offset, size) in allocated {
                if size > 0 {
                    if let Err(rollback_err) = self.remove_pos(blob_id, offset, size) {
                        error!(blob_id, offset, size, %rollback_err, "blob GC rollback failed");
                    }
                }
            }
            return Err(e);
        }
        Ok(edit)
    }
}

/// Compute per-field checksums for a payload given field begin offsets.
fn field_checksums(bytes: &[u8], begins: &[u64]) -> Vec<(u64, u64)> {
    let mut out = Vec::with_capacity(begins.len());
    for (i, &begin) in begins.iter().enumerate() {
        let end = begins
            .get(i + 1)
            .copied()
            .unwrap_or(bytes.len() as u64);
        let crc = crc64(&bytes[begin as usize..end as usize]);
        out.push((begin, crc));
    }
    out
}
