//! Persisted location record for one page.

use serde::{Deserialize, Serialize};

use stratum_result::{Error, Result};

use crate::types::{BlobFileId, INVALID_BLOB_ID};

/// Location of page bytes materialized outside the local blob files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLocation {
    pub data_file_id: String,
    pub offset: u64,
    pub size: u64,
}

/// Locates one page inside a blob file.
///
/// `field_offsets[i] = (begin, crc64)` partitions `[0, size)` into logical
/// fields: field `i` spans `[begin_i, begin_{i+1})`, the last field ending at
/// `size`. `padded_size` is nonzero only on the last entry of a packed
/// allocation and records the alignment padding that follows the bytes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageEntry {
    pub blob_id: BlobFileId,
    pub offset: u64,
    pub size: u64,
    pub tag: u64,
    pub checksum: u64,
    pub padded_size: u64,
    pub field_offsets: Vec<(u64, u64)>,
    pub remote: Option<RemoteLocation>,
}

impl PageEntry {
    /// Whether this entry owns bytes in a local blob file.
    pub fn is_local(&self) -> bool {
        self.blob_id != INVALID_BLOB_ID
    }

    /// Bytes this entry occupies in its blob, padding included.
    pub fn total_size(&self) -> u64 {
        self.size + self.padded_size
    }

    /// Byte range `[begin, end)` of field `index` inside the page.
    pub fn field_range(&self, index: usize) -> Result<(u64, u64)> {
        if index >= self.field_offsets.len() {
            return Err(Error::BadRequest(format!(
                "field index {index} out of range ({} fields)",
                self.field_offsets.len()
            )));
        }
        let begin = self.field_offsets[index].0;
        let end = if index + 1 == self.field_offsets.len() {
            self.size
        } else {
            self.field_offsets[index + 1].0
        };
        Ok((begin, end))
    }

    pub fn field_size(&self, index: usize) -> Result<u64> {
        let (begin, end) = self.field_range(index)?;
        Ok(end - begin)
    }

    pub fn field_checksum(&self, index: usize) -> u64 {
        self.field_offsets[index].1
    }

    /// Validate structural invariants before the entry enters the directory.
    pub fn validate(&self) -> Result<()> {
        let mut prev = None;
        for &(begin, _) in &self.field_offsets {
            if begin > self.size {
                return Err(Error::LogicalError(format!(
                    "field offset {begin} exceeds entry size {}",
                    self.size
                )));
            }
            if let Some(p) = prev {
                if begin <= p {
                    return Err(Error::LogicalError(format!(
                        "field offsets not strictly increasing: {p} then {begin}"
                    )));
                }
            }
            prev = Some(begin);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_fields(size: u64, begins: &[u64]) -> PageEntry {
        PageEntry {
            blob_id: 1,
            size,
            field_offsets: begins.iter().map(|&b| (b, 0)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn field_ranges() {
        let entry = entry_with_fields(30, &[0, 10, 20]);
        assert_eq!(entry.field_range(0).unwrap(), (0, 10));
        assert_eq!(entry.field_range(1).unwrap(), (10, 20));
        assert_eq!(entry.field_range(2).unwrap(), (20, 30));
        assert!(entry.field_range(3).is_err());
    }

    #[test]
    fn validate_rejects_disordered_offsets() {
        assert!(entry_with_fields(30, &[0, 20, 10]).validate().is_err());
        assert!(entry_with_fields(30, &[0, 40]).validate().is_err());
        assert!(entry_with_fields(30, &[0, 10, 20]).validate().is_ok());
    }
}
