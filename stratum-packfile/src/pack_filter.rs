//! Pack-level filtering: rough-set evaluation, explicit pack sets, handle
//! ranges, and MVCC version bounds combine into one `use_packs` vector.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::file::PackFile;
use crate::format::{HANDLE_COL_ID, VERSION_COL_ID};
use crate::minmax_index::ScalarValue;
use crate::roughset::{RsOperator, RsResult};

pub struct PackFilter {
    use_packs: Vec<bool>,
    /// Per-pack rough result of the handle-range restriction; drives the
    /// homogeneous-run rule and clean reads.
    handle_res: Vec<RsResult>,
    min_handles: Vec<Option<i64>>,
    min_versions: Vec<u64>,
    max_versions: Vec<u64>,
}

impl PackFilter {
    /// Evaluate all filters against a file's statistics.
    pub fn compute(
        file: &PackFile,
        rough_filter: Option<&RsOperator>,
        read_packs: Option<&FxHashSet<usize>>,
        handle_range: Option<(i64, i64)>,
        max_read_version: Option<u64>,
        enable_rough_set: bool,
    ) -> Self {
        let pack_count = file.meta.pack_count();
        let indexes = &file.indexes;

        let handle_bounds = per_pack_i64_bounds(indexes, HANDLE_COL_ID, pack_count);
        let version_bounds = per_pack_u64_bounds(indexes, VERSION_COL_ID, pack_count);

        let mut use_packs = vec![true; pack_count];
        let mut handle_res = vec![RsResult::Some; pack_count];
        let mut min_handles = vec![None; pack_count];
        let mut min_versions = vec![0u64; pack_count];
        let mut max_versions = vec![u64::MAX; pack_count];

        for pack_id in 0..pack_count {
            if let Some((min, max)) = handle_bounds[pack_id] {
                min_handles[pack_id] = Some(min);
                handle_res[pack_id] = match handle_range {
                    Some((begin, end)) => {
                        if max < begin || min >= end {
                            RsResult::None
                        } else if min >= begin && max < end {
                            RsResult::All
                        } else {
                            RsResult::Some
                        }
                    }
                    None => RsResult::All,
                };
            } else if handle_range.is_some() {
                handle_res[pack_id] = RsResult::Some;
            } else {
                handle_res[pack_id] = RsResult::All;
            }

            if let Some((min, max)) = version_bounds[pack_id] {
                min_versions[pack_id] = min;
                max_versions[pack_id] = max;
            } else {
                min_versions[pack_id] = file.meta.pack_stats[pack_id].first_version;
                max_versions[pack_id] = u64::MAX;
            }

            let mut keep = handle_res[pack_id] != RsResult::None;
            if let Some(read_packs) = read_packs {
                keep &= read_packs.contains(&pack_id);
            }
            if let Some(max_read) = max_read_version {
                keep &= min_versions[pack_id] <= max_read;
            }
            if keep && enable_rough_set {
                if let Some(filter) = rough_filter {
                    keep = filter.evaluate(indexes, pack_id) != RsResult::None;
                }
            }
            use_packs[pack_id] = keep;
        }

        Self {
            use_packs,
            handle_res,
            min_handles,
            min_versions,
            max_versions,
        }
    }

    pub fn use_packs(&self) -> &[bool] {
        &self.use_packs
    }

    pub fn use_packs_mut(&mut self) -> &mut [bool] {
        &mut self.use_packs
    }

    pub fn handle_res(&self) -> &[RsResult] {
        &self.handle_res
    }

    pub fn min_handle(&self, pack_id: usize) -> Option<i64> {
        self.min_handles.get(pack_id).copied().flatten()
    }

    pub fn min_version(&self, pack_id: usize) -> u64 {
        self.min_versions[pack_id]
    }

    pub fn max_version(&self, pack_id: usize) -> u64 {
        self.max_versions[pack_id]
    }
}

fn per_pack_i64_bounds(
    indexes: &FxHashMap<i64, crate::minmax_index::MinMaxIndex>,
    col: i64,
    pack_count: usize,
) -> Vec<Option<(i64, i64)>> {
    let mut out = vec![None; pack_count];
    if let Some(index) = indexes.get(&col) {
        for (pack_id, bounds) in index.packs.iter().enumerate().take(pack_count) {
            if let (Some(ScalarValue::Int(min)), Some(ScalarValue::Int(max))) =
                (&bounds.min, &bounds.max)
            {
                out[pack_id] = Some((*min, *max));
            }
        }
    }
    out
}

fn per_pack_u64_bounds(
    indexes: &FxHashMap<i64, crate::minmax_index::MinMaxIndex>,
    col: i64,
    pack_count: usize,
) -> Vec<Option<(u64, u64)>> {
    let mut out = vec![None; pack_count];
    if let Some(index) = indexes.get(&col) {
        for (pack_id, bounds) in index.packs.iter().enumerate().take(pack_count) {
            if let (Some(ScalarValue::UInt(min)), Some(ScalarValue::UInt(max))) =
                (&bounds.min, &bounds.max)
            {
                out[pack_id] = Some((*min, *max));
            }
        }
    }
    out
}
