//! Stratum: the storage and execution core of a columnar analytic read node.
//!
//! This facade re-exports the subsystem crates:
//!
//! - [`pagestore`]: durable blob-backed page store with space-managed
//!   allocation, an MVCC page directory, and copying garbage collection.
//! - [`packfile`]: immutable pack-oriented columnar files with rough-set
//!   pruning, mark/column caches, clean-read optimizations, and
//!   schema-evolution on read.
//! - [`join`]: a concurrent multi-variant equi-join hash engine over arrow
//!   blocks.
//! - [`common`]: checksums, memory accounting, I/O limiting, and
//!   the file-provider seam shared by everything above.

pub use stratum_common as common;
pub use stratum_join as join;
pub use stratum_packfile as packfile;
pub use stratum_pagestore as pagestore;
pub use stratum_result::{Error, Result};

/// Top-level configuration combining every subsystem's knobs.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StratumConfig {
    pub page_store: pagestore::PageStoreConfig,
    pub pack_file: packfile::PackFileConfig,
    pub join: join::JoinConfig,
}

impl StratumConfig {
    /// Resolve deprecated aliases across all sections.
    pub fn normalize(mut self) -> Self {
        self.pack_file = self.pack_file.normalize();
        self
    }
}
