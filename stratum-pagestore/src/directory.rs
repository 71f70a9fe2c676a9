//! MVCC directory mapping page ids to versioned entries.
//!
//! Edits apply atomically under a single write lock: every record of one
//! edit is tagged with the same fresh sequence number, so a snapshot either
//! observes the whole batch or none of it. Ref edges are resolved
//! transitively at commit time; reads never chase refs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rustc_hash::{FxHashMap, FxHashSet};
use stratum_result::{Error, Result};
use tracing::trace;

use crate::edit::{EditRecord, PageEdit};
use crate::entry::PageEntry;
use crate::types::{PageId, Sequence};

#[derive(Clone, Debug)]
enum Record {
    Entry(PageEntry),
    /// Alias of another page. Stores the resolved target, so lookups are one
    /// hop even for ref-of-ref chains.
    Ref(PageId),
    External,
    Tombstone,
}

#[derive(Default)]
struct VersionChain {
    /// (sequence, record), ascending by sequence.
    versions: Vec<(Sequence, Record)>,
}

impl VersionChain {
    fn visible_at(&self, seq: Sequence) -> Option<&Record> {
        self.versions
            .iter()
            .rev()
            .find(|(version, _)| *version <= seq)
            .map(|(_, record)| record)
    }

    fn latest(&self) -> Option<&Record> {
        self.versions.last().map(|(_, record)| record)
    }
}

/// Read-consistent view pinned at a sequence. Holding a snapshot keeps the
/// versions it can see alive across directory GC.
pub struct Snapshot {
    sequence: Sequence,
    live: Arc<Mutex<FxHashMap<Sequence, usize>>>,
}

impl Snapshot {
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        let mut live = self.live.lock().expect("snapshot registry poisoned");
        if let Some(count) = live.get_mut(&self.sequence) {
            *count -= 1;
            if *count == 0 {
                live.remove(&self.sequence);
            }
        }
    }
}

#[derive(Default)]
pub struct PageDirectory {
    pages: RwLock<FxHashMap<PageId, VersionChain>>,
    sequence: AtomicU64,
    live_snapshots: Arc<Mutex<FxHashMap<Sequence, usize>>>,
}

impl PageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Snapshot {
        let sequence = self.sequence();
        *self
            .live_snapshots
            .lock()
            .expect("snapshot registry poisoned")
            .entry(sequence)
            .or_insert(0) += 1;
        Snapshot {
            sequence,
            live: Arc::clone(&self.live_snapshots),
        }
    }

    /// Apply one edit atomically. All records get the same new sequence.
    pub fn apply(&self, edit: PageEdit) -> Result<Sequence> {
        let mut pages = self.pages.write().expect("directory lock poisoned");
        let seq = self.sequence.load(Ordering::Acquire) + 1;

        // Validate refs against the post-edit view before mutating anything:
        // an edit that creates a page and a ref to it in one batch is legal.
        let created: FxHashSet<PageId> = edit
            .records()
            .iter()
            .filter_map(|record| match record {
                EditRecord::Put { page_id, .. }
                | EditRecord::PutExternal { page_id }
                | EditRecord::UpdateRemote { page_id, .. } => Some(*page_id),
                _ => None,
            })
            .collect();
        for record in edit.records() {
            if let EditRecord::Ref { page_id, origin } = record {
                let resolved = Self::resolve_origin(&pages, *origin, &created)?;
                if resolved.is_none() {
                    return Err(Error::BadRequest(format!(
                        "ref {page_id} -> {origin} targets a non-existent page"
                    )));
                }
            }
        }

        for record in edit.records().iter().cloned() {
            match record {
                EditRecord::Put { page_id, entry } => {
                    entry.validate()?;
                    Self::push(&mut pages, page_id, seq, Record::Entry(entry));
                }
                EditRecord::PutExternal { page_id } => {
                    Self::push(&mut pages, page_id, seq, Record::External);
                }
                EditRecord::Ref { page_id, origin } => {
                    // Flatten ref-of-ref to the final target.
                    let target = match Self::resolve_origin(&pages, origin, &created)? {
                        Some(target) => target,
                        None => origin,
                    };
                    Self::push(&mut pages, page_id, seq, Record::Ref(target));
                }
                EditRecord::Del { page_id } => {
                    Self::push(&mut pages, page_id, seq, Record::Tombstone);
                }
                EditRecord::UpdateRemote { page_id, mut entry } => {
                    // Preserve the remote location of the entry being updated
                    // so the page can be re-fetched if local data is dropped.
                    if let Some(chain) = pages.get(&page_id) {
                        if let Some(Record::Entry(old)) = chain.latest() {
                            if entry.remote.is_none() {
                                entry.remote = old.remote.clone();
                            }
                        }
                    }
                    Self::push(&mut pages, page_id, seq, Record::Entry(entry));
                }
                EditRecord::Upsert {
                    page_id,
                    version,
                    entry,
                } => {
                    // GC relocation: rebind in place, do not create a new
                    // visible version.
                    let chain = pages.entry(page_id).or_default();
                    match chain
                        .versions
                        .iter_mut()
                        .find(|(v, _)| *v == version)
                    {
                        Some((_, record)) => *record = Record::Entry(entry),
                        None => {
                            return Err(Error::LogicalError(format!(
                                "upsert for page {page_id} at version {version} \
                                 found no matching record"
                            )));
                        }
                    }
                }
            }
        }

        self.sequence.store(seq, Ordering::Release);
        trace!(sequence = seq, records = edit.records().len(), "edit applied");
        Ok(seq)
    }

    fn push(
        pages: &mut FxHashMap<PageId, VersionChain>,
        page_id: PageId,
        seq: Sequence,
        record: Record,
    ) {
        pages.entry(page_id).or_default().versions.push((seq, record));
    }

    /// Resolve `origin` to the page id whose chain currently holds real
    /// bytes, following ref edges. `created` covers pages introduced earlier
    /// in the same edit.
    fn resolve_origin(
        pages: &FxHashMap<PageId, VersionChain>,
        origin: PageId,
        created: &FxHashSet<PageId>,
    ) -> Result<Option<PageId>> {
        let mut cur = origin;
        for _ in 0..64 {
            match pages.get(&cur).and_then(|chain| chain.latest()) {
                Some(Record::Entry(_)) | Some(Record::External) => return Ok(Some(cur)),
                Some(Record::Ref(target)) => cur = *target,
                Some(Record::Tombstone) | None => {
                    return if created.contains(&cur) {
                        Ok(Some(cur))
                    } else {
                        Ok(None)
                    };
                }
            }
        }
        Err(Error::LogicalError(format!(
            "ref chain from {origin} exceeds depth limit"
        )))
    }

    /// Resolve a page id to its entry under a snapshot. External pages yield
    /// an empty entry (`size == 0`). Deleted / unknown pages yield `None`.
    ///
    /// A ref pins its target's bytes: deleting the target id later does not
    /// break the alias, so resolution through a ref skips tombstones and
    /// lands on the newest entry at or below the snapshot.
    pub fn get(&self, page_id: PageId, snap: &Snapshot) -> Option<PageEntry> {
        let pages = self.pages.read().expect("directory lock poisoned");
        let mut cur = page_id;
        let mut via_ref = false;
        loop {
            let chain = pages.get(&cur)?;
            let record = if via_ref {
                chain
                    .versions
                    .iter()
                    .rev()
                    .filter(|(version, _)| *version <= snap.sequence)
                    .map(|(_, record)| record)
                    .find(|record| !matches!(record, Record::Tombstone))?
            } else {
                chain.visible_at(snap.sequence)?
            };
            match record {
                Record::Entry(entry) => return Some(entry.clone()),
                Record::External => return Some(PageEntry::default()),
                Record::Ref(target) => {
                    cur = *target;
                    via_ref = true;
                }
                Record::Tombstone => return None,
            }
        }
    }

    /// Resolve several ids at once, failing on the first missing page.
    pub fn get_many(&self, page_ids: &[PageId], snap: &Snapshot) -> Result<Vec<PageEntry>> {
        page_ids
            .iter()
            .map(|&id| {
                self.get(id, snap)
                    .ok_or_else(|| Error::NotFound(format!("page {id} at seq {}", snap.sequence)))
            })
            .collect()
    }

    /// All live (page_id, version, entry) triples per blob, for GC planning.
    /// A version is live if it is the newest, or still visible to a snapshot.
    pub fn live_entries(
        &self,
    ) -> FxHashMap<crate::types::BlobFileId, Vec<(PageId, Sequence, PageEntry)>> {
        let pages = self.pages.read().expect("directory lock poisoned");
        let lowest = self.lowest_live_sequence();
        let mut out: FxHashMap<crate::types::BlobFileId, Vec<(PageId, Sequence, PageEntry)>> =
            FxHashMap::default();
        for (&page_id, chain) in pages.iter() {
            for (i, (seq, record)) in chain.versions.iter().enumerate() {
                let newest = i + 1 == chain.versions.len();
                let visible_to_snapshot = *seq >= lowest || {
                    // Visible if no newer version is at or below `lowest`.
                    chain.versions[i + 1..].iter().all(|(s, _)| *s > lowest)
                };
                if !newest && !visible_to_snapshot {
                    continue;
                }
                if let Record::Entry(entry) = record {
                    if entry.is_local() && entry.size > 0 {
                        out.entry(entry.blob_id)
                            .or_default()
                            .push((page_id, *seq, entry.clone()));
                    }
                }
            }
        }
        out
    }

    fn lowest_live_sequence(&self) -> Sequence {
        self.live_snapshots
            .lock()
            .expect("snapshot registry poisoned")
            .keys()
            .copied()
            .min()
            .unwrap_or_else(|| self.sequence())
    }

    /// Drop versions no snapshot can observe. Returns entries whose blob
    /// space can be retracted (superseded entries and pages fully deleted).
    pub fn gc_versions(&self) -> Vec<PageEntry> {
        let lowest = self.lowest_live_sequence();
        let mut pages = self.pages.write().expect("directory lock poisoned");

        // Ref targets must survive even if the target id itself was deleted.
        let mut ref_targets: FxHashSet<PageId> = FxHashSet::default();
        for chain in pages.values() {
            for (_, record) in &chain.versions {
                if let Record::Ref(target) = record {
                    ref_targets.insert(*target);
                }
            }
        }

        let mut retracted = Vec::new();
        pages.retain(|page_id, chain| {
            // Ref targets keep their full history: an alias created before a
            // delete must still resolve to the bytes.
            if ref_targets.contains(page_id) {
                return true;
            }
            // Index of the newest version visible at `lowest`; everything
            // older is unobservable.
            let keep_from = chain
                .versions
                .iter()
                .rposition(|(seq, _)| *seq <= lowest)
                .unwrap_or(0);
            for (_, record) in chain.versions.drain(..keep_from) {
                if let Record::Entry(entry) = record {
                    if entry.is_local() && entry.size > 0 {
                        retracted.push(entry);
                    }
                }
            }
            // A chain that is just a tombstone now can disappear entirely.
            !(chain.versions.len() == 1 && matches!(chain.versions[0].1, Record::Tombstone))
        });
        retracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(blob_id: u64, offset: u64, size: u64) -> PageEntry {
        PageEntry {
            blob_id,
            offset,
            size,
            ..Default::default()
        }
    }

    #[test]
    fn snapshot_sees_committed_state_only() {
        let dir = PageDirectory::new();
        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 0, 10));
        dir.apply(edit).unwrap();

        let snap = dir.snapshot();
        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 100, 20));
        edit.put(2, entry(1, 200, 30));
        dir.apply(edit).unwrap();

        // Old snapshot still sees the first version and no page 2.
        assert_eq!(dir.get(1, &snap).unwrap().offset, 0);
        assert!(dir.get(2, &snap).is_none());

        let snap2 = dir.snapshot();
        assert_eq!(dir.get(1, &snap2).unwrap().offset, 100);
        assert_eq!(dir.get(2, &snap2).unwrap().size, 30);
    }

    #[test]
    fn refs_resolve_transitively_at_commit() {
        let dir = PageDirectory::new();
        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 0, 10));
        dir.apply(edit).unwrap();

        let mut edit = PageEdit::new();
        edit.reference(2, 1);
        dir.apply(edit).unwrap();
        let mut edit = PageEdit::new();
        edit.reference(3, 2);
        dir.apply(edit).unwrap();

        let snap = dir.snapshot();
        assert_eq!(dir.get(3, &snap).unwrap().size, 10);

        // Deleting the alias leaves the target readable.
        let mut edit = PageEdit::new();
        edit.del(2);
        dir.apply(edit).unwrap();
        let snap = dir.snapshot();
        assert!(dir.get(2, &snap).is_none());
        assert_eq!(dir.get(3, &snap).unwrap().size, 10);
    }

    #[test]
    fn ref_survives_origin_delete() {
        let dir = PageDirectory::new();
        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 0, 10));
        dir.apply(edit).unwrap();
        let mut edit = PageEdit::new();
        edit.reference(2, 1);
        dir.apply(edit).unwrap();

        // Deleting the origin id must not break the alias.
        let mut edit = PageEdit::new();
        edit.del(1);
        dir.apply(edit).unwrap();

        let snap = dir.snapshot();
        assert!(dir.get(1, &snap).is_none());
        assert_eq!(dir.get(2, &snap).unwrap().size, 10);

        // Version GC must not retract the pinned bytes either.
        let retracted = dir.gc_versions();
        assert!(retracted.is_empty());
        assert_eq!(dir.get(2, &snap).unwrap().size, 10);
    }

    #[test]
    fn dangling_ref_rejected() {
        let dir = PageDirectory::new();
        let mut edit = PageEdit::new();
        edit.reference(2, 99);
        assert!(matches!(dir.apply(edit), Err(Error::BadRequest(_))));
    }

    #[test]
    fn ref_to_page_created_in_same_edit() {
        let dir = PageDirectory::new();
        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 0, 10));
        edit.reference(2, 1);
        dir.apply(edit).unwrap();
        let snap = dir.snapshot();
        assert_eq!(dir.get(2, &snap).unwrap().size, 10);
    }

    #[test]
    fn upsert_rebinds_without_new_version() {
        let dir = PageDirectory::new();
        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 0, 10));
        let seq = dir.apply(edit).unwrap();

        let snap_before = dir.snapshot();
        let mut edit = PageEdit::new();
        edit.upsert(1, seq, entry(2, 500, 10));
        dir.apply(edit).unwrap();

        // The same snapshot now resolves to the relocated entry.
        assert_eq!(dir.get(1, &snap_before).unwrap().blob_id, 2);
    }

    #[test]
    fn gc_versions_drops_unobservable_history() {
        let dir = PageDirectory::new();
        for i in 0..5u64 {
            let mut edit = PageEdit::new();
            edit.put(1, entry(1, i * 100, 10));
            dir.apply(edit).unwrap();
        }
        let retracted = dir.gc_versions();
        assert_eq!(retracted.len(), 4);

        let snap = dir.snapshot();
        assert_eq!(dir.get(1, &snap).unwrap().offset, 400);
    }

    #[test]
    fn gc_versions_respects_live_snapshots() {
        let dir = PageDirectory::new();
        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 0, 10));
        dir.apply(edit).unwrap();
        let snap = dir.snapshot();

        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 100, 10));
        dir.apply(edit).unwrap();

        let retracted = dir.gc_versions();
        assert!(retracted.is_empty());
        assert_eq!(dir.get(1, &snap).unwrap().offset, 0);

        drop(snap);
        let retracted = dir.gc_versions();
        assert_eq!(retracted.len(), 1);
        assert_eq!(retracted[0].offset, 0);
    }

    #[test]
    fn deleted_page_space_is_retractable() {
        let dir = PageDirectory::new();
        let mut edit = PageEdit::new();
        edit.put(1, entry(1, 0, 10));
        dir.apply(edit).unwrap();
        let mut edit = PageEdit::new();
        edit.del(1);
        dir.apply(edit).unwrap();

        let retracted = dir.gc_versions();
        assert_eq!(retracted.len(), 1);
        let snap = dir.snapshot();
        assert!(dir.get(1, &snap).is_none());
    }
}
