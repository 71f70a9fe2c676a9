//! Pack file configuration.

use serde::{Deserialize, Serialize};
use stratum_common::checksum::ChecksumAlgo;

use crate::compress::CompressionMethod;

const MIB: usize = 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PackFileConfig {
    /// Max rows per pack in written files.
    pub pack_rows: usize,
    /// Deprecated alias of `pack_rows`; when both are set the newer name
    /// wins.
    pub segment_stable_pack_rows: Option<usize>,
    pub checksum_algorithm: ChecksumAlgo,
    /// Target decompressed bytes per frame for mark/index framing.
    pub checksum_frame_length: usize,
    pub compression_method: CompressionMethod,
    pub compression_level: i32,
    /// Per-column streaming buffer ceiling.
    pub max_read_buffer_size: usize,
    pub enable_column_cache: bool,
    pub enable_rough_set_filter: bool,
    pub read_one_pack_every_time: bool,
    pub is_fast_scan: bool,
    /// Upper bound of rows returned by one `read()` call.
    pub rows_threshold_per_read: usize,
    pub mark_cache_bytes: usize,
    pub column_cache_bytes: usize,
}

impl Default for PackFileConfig {
    fn default() -> Self {
        Self {
            pack_rows: 8192,
            segment_stable_pack_rows: None,
            checksum_algorithm: ChecksumAlgo::Crc64,
            checksum_frame_length: MIB,
            compression_method: CompressionMethod::Lz4,
            compression_level: 1,
            max_read_buffer_size: MIB,
            enable_column_cache: true,
            enable_rough_set_filter: true,
            read_one_pack_every_time: false,
            is_fast_scan: false,
            rows_threshold_per_read: 8192 * 3,
            mark_cache_bytes: 16 * MIB,
            column_cache_bytes: 64 * MIB,
        }
    }
}

impl PackFileConfig {
    /// Rows per pack honoring the deprecated alias.
    pub fn effective_pack_rows(&self) -> usize {
        self.pack_rows
    }

    /// Resolve deprecated aliases. When only the deprecated name is present
    /// it feeds the new one; when both are present the new name wins.
    pub fn normalize(mut self) -> Self {
        if let Some(deprecated) = self.segment_stable_pack_rows.take() {
            if self.pack_rows == Self::default().pack_rows {
                self.pack_rows = deprecated;
            }
        }
        self
    }
}
