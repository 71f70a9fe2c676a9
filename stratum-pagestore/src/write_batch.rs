//! Write batches accepted by the page store.

use bytes::Bytes;

use crate::entry::RemoteLocation;
use crate::types::PageId;

#[derive(Clone, Debug)]
pub enum WriteItem {
    /// Persist `bytes` under `page_id`. `field_offsets` are the begin offsets
    /// of each logical field; field checksums are filled in by the store.
    Put {
        page_id: PageId,
        bytes: Bytes,
        tag: u64,
        field_offsets: Vec<u64>,
    },
    /// Register a page materialized elsewhere; no local bytes.
    PutExternal { page_id: PageId },
    /// Register a page whose bytes live in a remote data file.
    PutRemote {
        page_id: PageId,
        location: RemoteLocation,
        tag: u64,
        field_offsets: Vec<u64>,
    },
    /// Make `page_id` an alias of `origin`.
    Ref { page_id: PageId, origin: PageId },
    /// Delete `page_id`.
    Del { page_id: PageId },
    /// Replace the local bytes of a page previously fetched from remote.
    UpdateRemote {
        page_id: PageId,
        bytes: Bytes,
        tag: u64,
    },
}

impl WriteItem {
    pub fn data_size(&self) -> u64 {
        match self {
            WriteItem::Put { bytes, .. } | WriteItem::UpdateRemote { bytes, .. } => {
                bytes.len() as u64
            }
            _ => 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    items: Vec<WriteItem>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, page_id: PageId, bytes: impl Into<Bytes>) -> &mut Self {
        self.items.push(WriteItem::Put {
            page_id,
            bytes: bytes.into(),
            tag: 0,
            field_offsets: Vec::new(),
        });
        self
    }

    pub fn put_with_fields(
        &mut self,
        page_id: PageId,
        bytes: impl Into<Bytes>,
        field_offsets: Vec<u64>,
    ) -> &mut Self {
        self.items.push(WriteItem::Put {
            page_id,
            bytes: bytes.into(),
            tag: 0,
            field_offsets,
        });
        self
    }

    pub fn put_external(&mut self, page_id: PageId) -> &mut Self {
        self.items.push(WriteItem::PutExternal { page_id });
        self
    }

    pub fn put_remote(&mut self, page_id: PageId, location: RemoteLocation) -> &mut Self {
        self.items.push(WriteItem::PutRemote {
            page_id,
            location,
            tag: 0,
            field_offsets: Vec::new(),
        });
        self
    }

    pub fn reference(&mut self, page_id: PageId, origin: PageId) -> &mut Self {
        self.items.push(WriteItem::Ref { page_id, origin });
        self
    }

    pub fn del(&mut self, page_id: PageId) -> &mut Self {
        self.items.push(WriteItem::Del { page_id });
        self
    }

    pub fn update_remote(&mut self, page_id: PageId, bytes: impl Into<Bytes>) -> &mut Self {
        self.items.push(WriteItem::UpdateRemote {
            page_id,
            bytes: bytes.into(),
            tag: 0,
        });
        self
    }

    pub fn items(&self) -> &[WriteItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<WriteItem> {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total payload bytes that must land in blob files.
    pub fn total_data_size(&self) -> u64 {
        self.items.iter().map(WriteItem::data_size).sum()
    }

    /// Number of items carrying payload bytes.
    pub fn put_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.data_size() > 0)
            .count()
    }
}
