//! In-memory page returned by reads.

use bytes::Bytes;

use crate::types::PageId;

/// A page's bytes plus the field partition recovered from its entry.
///
/// `data` is a slice of a buffer shared by every page of the same read call,
/// so cloning a `Page` never copies payload bytes. For field reads the data
/// holds only the requested fields, densely packed, and `field_offsets` maps
/// each requested field index to its offset inside `data`.
#[derive(Clone, Debug)]
pub struct Page {
    pub page_id: PageId,
    pub data: Bytes,
    /// (field index, offset of that field inside `data`), ascending.
    pub field_offsets: Vec<(usize, usize)>,
}

impl Page {
    pub fn new(page_id: PageId, data: Bytes) -> Self {
        Self {
            page_id,
            data,
            field_offsets: Vec::new(),
        }
    }

    /// Bytes of one field. `index` is the original field index of the entry.
    pub fn field_data(&self, index: usize) -> Option<Bytes> {
        let pos = self
            .field_offsets
            .iter()
            .position(|&(field, _)| field == index)?;
        let begin = self.field_offsets[pos].1;
        let end = self
            .field_offsets
            .get(pos + 1)
            .map(|&(_, offset)| offset)
            .unwrap_or(self.data.len());
        Some(self.data.slice(begin..end))
    }
}
