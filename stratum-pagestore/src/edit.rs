//! Directory edits produced by blob writes and GC.
//!
//! An edit is the full description of how the in-memory directory should
//! transition for one write batch (or one GC pass). The directory applies an
//! edit atomically so readers never observe part of a batch.

use crate::entry::PageEntry;
use crate::types::{PageId, Sequence};

#[derive(Clone, Debug)]
pub enum EditRecord {
    Put { page_id: PageId, entry: PageEntry },
    PutExternal { page_id: PageId },
    Ref { page_id: PageId, origin: PageId },
    Del { page_id: PageId },
    UpdateRemote { page_id: PageId, entry: PageEntry },
    /// GC relocation: rebind `page_id` at its existing `version` to a new
    /// entry without creating a new visible version.
    Upsert {
        page_id: PageId,
        version: Sequence,
        entry: PageEntry,
    },
}

#[derive(Clone, Debug, Default)]
pub struct PageEdit {
    records: Vec<EditRecord>,
}

impl PageEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, page_id: PageId, entry: PageEntry) {
        self.records.push(EditRecord::Put { page_id, entry });
    }

    pub fn put_external(&mut self, page_id: PageId) {
        self.records.push(EditRecord::PutExternal { page_id });
    }

    pub fn reference(&mut self, page_id: PageId, origin: PageId) {
        self.records.push(EditRecord::Ref { page_id, origin });
    }

    pub fn del(&mut self, page_id: PageId) {
        self.records.push(EditRecord::Del { page_id });
    }

    pub fn update_remote(&mut self, page_id: PageId, entry: PageEntry) {
        self.records.push(EditRecord::UpdateRemote { page_id, entry });
    }

    pub fn upsert(&mut self, page_id: PageId, version: Sequence, entry: PageEntry) {
        self.records.push(EditRecord::Upsert {
            page_id,
            version,
            entry,
        });
    }

    pub fn records(&self) -> &[EditRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
