//! Identifier types shared across the page store.

/// Logical page identifier.
pub type PageId = u64;

/// Identifier of a blob file on disk.
pub type BlobFileId = u64;

/// Blob id used by entries that have no local bytes (external / remote).
pub const INVALID_BLOB_ID: BlobFileId = 0;

/// Directory commit sequence number.
pub type Sequence = u64;
