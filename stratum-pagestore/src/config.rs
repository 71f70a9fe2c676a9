//! Page store configuration.

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PageStoreConfig {
    /// Max bytes per blob file. Write batches larger than this are split.
    pub file_limit_size: u64,
    /// Padding quantum for packed allocations. 0 disables alignment.
    pub block_alignment_bytes: u64,
    /// Blobs whose valid rate falls to or below this are rewritten by GC.
    pub heavy_gc_valid_rate: f64,
    /// A blob stops accepting new writes once its largest free span drops
    /// below this fraction of the file limit.
    pub min_reuse_rate: f64,
}

impl Default for PageStoreConfig {
    fn default() -> Self {
        Self {
            file_limit_size: 256 * MIB,
            block_alignment_bytes: 0,
            heavy_gc_valid_rate: 0.5,
            min_reuse_rate: 0.05,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PageStoreConfig::default();
        assert_eq!(config.file_limit_size, 256 * MIB);
        assert_eq!(config.block_alignment_bytes, 0);
        assert!((config.heavy_gc_valid_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: PageStoreConfig =
            serde_json::from_str(r#"{"heavy_gc_valid_rate": 0.99}"#).unwrap();
        assert!((config.heavy_gc_valid_rate - 0.99).abs() < f64::EPSILON);
        assert_eq!(config.file_limit_size, 256 * MIB);
    }
}
