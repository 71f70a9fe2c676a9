//! Handle to one immutable pack file directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use stratum_common::checksum::ChecksumAlgo;
use stratum_common::file_provider::FileProvider;
use stratum_result::Result;

use crate::format::{col_data_file, col_index_file, ColId};
use crate::meta::{read_file, PackFileMeta};
use crate::minmax_index::MinMaxIndex;

pub struct PackFile {
    pub dir: PathBuf,
    pub provider: Arc<dyn FileProvider>,
    pub meta: PackFileMeta,
    /// Min/max indexes keyed by column id, for every column that has one.
    pub indexes: FxHashMap<ColId, MinMaxIndex>,
}

impl std::fmt::Debug for PackFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackFile")
            .field("dir", &self.dir)
            .field("meta", &self.meta)
            .field("indexes", &self.indexes)
            .finish()
    }
}

impl PackFile {
    /// Open a pack file, detecting its schema variant. `expected_algo`
    /// refuses files configured with a different checksum algorithm.
    pub fn open(
        provider: Arc<dyn FileProvider>,
        dir: impl AsRef<Path>,
        expected_algo: Option<ChecksumAlgo>,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta = PackFileMeta::read(&provider, &dir, expected_algo)?;

        let mut indexes = FxHashMap::default();
        for stat in &meta.column_stats {
            if stat.index_bytes == 0 {
                continue;
            }
            let path = dir.join(col_index_file(stat.col_id));
            if !provider.exists(&path) {
                continue;
            }
            let bytes = read_file(&provider, &path)?;
            let index = decode_index(&bytes, meta.frame_checksum())?;
            indexes.insert(stat.col_id, index);
        }

        Ok(Self {
            dir,
            provider,
            meta,
            indexes,
        })
    }

    /// Cache identity of this file (path-based).
    pub fn file_id(&self) -> String {
        self.dir.display().to_string()
    }

    pub fn total_rows(&self) -> u64 {
        self.meta.total_rows()
    }

    pub fn pack_count(&self) -> usize {
        self.meta.pack_count()
    }

    pub fn is_column_exist(&self, col_id: ColId) -> bool {
        self.meta.column_stat(col_id).is_some()
    }

    pub fn col_path(&self, name: String) -> PathBuf {
        self.dir.join(name)
    }

    pub fn col_data_size(&self, col_id: ColId) -> u64 {
        self.provider
            .file_size(&self.dir.join(col_data_file(col_id)))
            .unwrap_or(0)
    }
}

fn decode_index(bytes: &[u8], algo: ChecksumAlgo) -> Result<MinMaxIndex> {
    if algo == ChecksumAlgo::None {
        MinMaxIndex::decode(bytes)
    } else {
        let raw = crate::compress::decode_frame(bytes, algo)?;
        MinMaxIndex::decode(&raw)
    }
}

pub(crate) fn encode_index(index: &MinMaxIndex, algo: ChecksumAlgo) -> Result<Vec<u8>> {
    let raw = index.encode();
    if algo == ChecksumAlgo::None {
        Ok(raw)
    } else {
        crate::compress::encode_frame(&raw, crate::compress::CompressionMethod::None, 0, algo)
    }
}
