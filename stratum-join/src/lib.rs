//! Equi-join hash engine.
//!
//! The build side retains its blocks and indexes them in one of eleven map
//! shapes chosen from the key column types and collations. Probes stream
//! left blocks against the finished table, preserving left-row order within
//! a call. RIGHT and FULL joins track which build rows were emitted so a
//! final non-joined pass can stream the leftovers.

pub mod join;
pub mod key;
pub mod map;
pub mod non_joined;
pub mod probe;

use arrow::array::{BooleanArray, RecordBatch};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use join::{Join, ProbeProcessInfo};
pub use key::JoinMethod;
pub use map::RowRef;
pub use non_joined::NonJoinedStream;

/// Join kind. LEFT and RIGHT are not symmetric: the build side is always the
/// right table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    /// Left semi: emit (or flag) left rows with at least one match.
    Semi,
    /// Left anti: emit (or flag) left rows with no match.
    Anti,
    Cross,
}

impl JoinKind {
    /// Whether non-joined right rows must be emitted after probing.
    pub fn needs_non_joined(self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Full)
    }

    /// Whether unmatched left rows survive with null right columns.
    pub fn keeps_unmatched_left(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full)
    }
}

/// ANY keeps at most one build row per key; ALL keeps every one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strictness {
    Any,
    All,
}

/// String-key collation classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collation {
    /// Raw byte comparison.
    Binary,
    /// Byte comparison after right-trimming trailing spaces.
    BinaryPadding,
    /// ASCII case-insensitive comparison.
    Utf8General,
}

/// One equi-key: column indices into the probe (left) and build (right)
/// blocks, plus the collation for string keys.
#[derive(Clone, Debug)]
pub struct JoinKeyDesc {
    pub left_index: usize,
    pub right_index: usize,
    pub collation: Option<Collation>,
}

impl JoinKeyDesc {
    pub fn new(left_index: usize, right_index: usize) -> Self {
        Self {
            left_index,
            right_index,
            collation: None,
        }
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }
}

/// Residual non-equi predicate applied to assembled output rows.
pub type OtherFilter =
    Arc<dyn Fn(&RecordBatch) -> stratum_result::Result<BooleanArray> + Send + Sync>;

/// Pre-filter over build-side blocks; rejected rows skip the map but are
/// still emitted by the non-joined pass for RIGHT/FULL.
pub type RightPreFilter = OtherFilter;

#[derive(Clone)]
pub struct JoinOptions {
    pub kind: JoinKind,
    pub strictness: Strictness,
    pub keys: Vec<JoinKeyDesc>,
    pub max_block_size: usize,
    pub other_filter: Option<OtherFilter>,
    pub right_pre_filter: Option<RightPreFilter>,
    /// When set for Semi/Anti, rows are flagged in this helper column
    /// instead of being filtered.
    pub match_helper_name: Option<String>,
}

impl JoinOptions {
    pub fn new(kind: JoinKind, strictness: Strictness, keys: Vec<JoinKeyDesc>) -> Self {
        Self {
            kind,
            strictness,
            keys,
            max_block_size: 8192,
            other_filter: None,
            right_pre_filter: None,
            match_helper_name: None,
        }
    }

    pub fn with_max_block_size(mut self, max_block_size: usize) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    pub fn with_other_filter(mut self, filter: OtherFilter) -> Self {
        self.other_filter = Some(filter);
        self
    }

    pub fn with_match_helper(mut self, name: impl Into<String>) -> Self {
        self.match_helper_name = Some(name.into());
        self
    }
}

/// Engine-level configuration knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub max_block_size: usize,
    pub build_concurrency: usize,
    /// When nonzero, shard counts are aligned to it so fine-grained shuffle
    /// partitions map onto disjoint shard sets.
    pub fine_grained_shuffle_count: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            max_block_size: 8192,
            build_concurrency: 1,
            fine_grained_shuffle_count: 0,
        }
    }
}
