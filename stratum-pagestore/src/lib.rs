//! Durable blob-backed page store.
//!
//! Pages are opaque byte strings keyed by a 64-bit logical id. Bytes live in
//! append-write, random-read blob files whose free space is tracked by a
//! [`SpaceMap`] per blob. The [`BlobStore`] packs write batches into blob
//! allocations, verifies CRC64 on every read, and reclaims fragmented blobs
//! with a copying GC. The [`PageDirectory`] maps page ids to entries under
//! MVCC so readers pin a snapshot and never observe a torn batch.

pub mod blob_file;
pub mod blob_stats;
pub mod blob_store;
pub mod config;
pub mod directory;
pub mod edit;
pub mod entry;
pub mod page;
pub mod page_store;
pub mod space_map;
pub mod types;
pub mod write_batch;

pub use blob_store::BlobStore;
pub use config::PageStoreConfig;
pub use directory::{PageDirectory, Snapshot};
pub use edit::{EditRecord, PageEdit};
pub use entry::{PageEntry, RemoteLocation};
pub use page::Page;
pub use page_store::PageStore;
pub use space_map::SpaceMap;
pub use types::{BlobFileId, PageId};
pub use write_batch::{WriteBatch, WriteItem};
