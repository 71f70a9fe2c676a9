//! Rough-set predicate operators evaluated against pack min/max statistics.
//!
//! Evaluation is three-valued: `All` (every row matches), `Some` (can't
//! rule rows in or out), `None` (no row can match). Pruning keeps packs
//! whose result is not `None`; clean reads additionally exploit `All`.

use rustc_hash::FxHashMap;
use std::cmp::Ordering;

use crate::format::ColId;
use crate::minmax_index::{MinMaxIndex, PackBounds, ScalarValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RsResult {
    All,
    Some,
    None,
}

impl RsResult {
    pub fn logical_not(self) -> RsResult {
        match self {
            RsResult::All => RsResult::None,
            RsResult::Some => RsResult::Some,
            RsResult::None => RsResult::All,
        }
    }

    pub fn logical_and(self, other: RsResult) -> RsResult {
        match (self, other) {
            (RsResult::None, _) | (_, RsResult::None) => RsResult::None,
            (RsResult::All, RsResult::All) => RsResult::All,
            _ => RsResult::Some,
        }
    }

    pub fn logical_or(self, other: RsResult) -> RsResult {
        match (self, other) {
            (RsResult::All, _) | (_, RsResult::All) => RsResult::All,
            (RsResult::None, RsResult::None) => RsResult::None,
            _ => RsResult::Some,
        }
    }
}

/// Predicate tree pushed down to the pack level.
#[derive(Clone, Debug)]
pub enum RsOperator {
    And(Vec<RsOperator>),
    Or(Vec<RsOperator>),
    Not(Box<RsOperator>),
    Equal { col: ColId, value: ScalarValue },
    NotEqual { col: ColId, value: ScalarValue },
    Greater { col: ColId, value: ScalarValue, or_equal: bool },
    Less { col: ColId, value: ScalarValue, or_equal: bool },
    In { col: ColId, values: Vec<ScalarValue> },
    IsNull { col: ColId },
    /// Predicate the rough layer cannot reason about; always `Some`.
    Unsupported,
}

impl RsOperator {
    /// Evaluate against pack `pack_id` using the per-column indexes.
    pub fn evaluate(
        &self,
        indexes: &FxHashMap<ColId, MinMaxIndex>,
        pack_id: usize,
    ) -> RsResult {
        match self {
            RsOperator::And(children) => children
                .iter()
                .map(|child| child.evaluate(indexes, pack_id))
                .fold(RsResult::All, RsResult::logical_and),
            RsOperator::Or(children) => children
                .iter()
                .map(|child| child.evaluate(indexes, pack_id))
                .fold(RsResult::None, RsResult::logical_or),
            RsOperator::Not(child) => child.evaluate(indexes, pack_id).logical_not(),
            RsOperator::Equal { col, value } => {
                with_bounds(indexes, *col, pack_id, |bounds| equal_result(bounds, value))
            }
            RsOperator::NotEqual { col, value } => with_bounds(indexes, *col, pack_id, |bounds| {
                equal_result(bounds, value).logical_not()
            }),
            RsOperator::Greater { col, value, or_equal } => {
                with_bounds(indexes, *col, pack_id, |bounds| {
                    compare_result(bounds, value, *or_equal, Ordering::Greater)
                })
            }
            RsOperator::Less { col, value, or_equal } => {
                with_bounds(indexes, *col, pack_id, |bounds| {
                    compare_result(bounds, value, *or_equal, Ordering::Less)
                })
            }
            RsOperator::In { col, values } => with_bounds(indexes, *col, pack_id, |bounds| {
                values
                    .iter()
                    .map(|value| equal_result(bounds, value))
                    .fold(RsResult::None, RsResult::logical_or)
            }),
            RsOperator::IsNull { col } => match lookup(indexes, *col, pack_id) {
                Some(bounds) => {
                    if !bounds.has_null {
                        RsResult::None
                    } else if bounds.min.is_none() {
                        // No bounds at all: the whole pack is null.
                        RsResult::All
                    } else {
                        RsResult::Some
                    }
                }
                None => RsResult::Some,
            },
            RsOperator::Unsupported => RsResult::Some,
        }
    }
}

fn lookup<'a>(
    indexes: &'a FxHashMap<ColId, MinMaxIndex>,
    col: ColId,
    pack_id: usize,
) -> Option<&'a PackBounds> {
    indexes.get(&col).and_then(|index| index.packs.get(pack_id))
}

/// Value predicates can only claim `All` when the pack has no nulls, since a
/// null row never matches a value comparison.
fn with_bounds(
    indexes: &FxHashMap<ColId, MinMaxIndex>,
    col: ColId,
    pack_id: usize,
    eval: impl Fn(&PackBounds) -> RsResult,
) -> RsResult {
    match lookup(indexes, col, pack_id) {
        Some(bounds) => {
            if bounds.min.is_none() || bounds.max.is_none() {
                // All-null pack: no value matches.
                return RsResult::None;
            }
            let result = eval(bounds);
            if result == RsResult::All && bounds.has_null {
                RsResult::Some
            } else {
                result
            }
        }
        None => RsResult::Some,
    }
}

fn equal_result(bounds: &PackBounds, value: &ScalarValue) -> RsResult {
    let (min, max) = match (&bounds.min, &bounds.max) {
        (Some(min), Some(max)) => (min, max),
        _ => return RsResult::None,
    };
    let below = match value.partial_cmp_same(min) {
        Some(ordering) => ordering == Ordering::Less,
        None => return RsResult::Some,
    };
    let above = match value.partial_cmp_same(max) {
        Some(ordering) => ordering == Ordering::Greater,
        None => return RsResult::Some,
    };
    if below || above {
        RsResult::None
    } else if value.partial_cmp_same(min) == Some(Ordering::Equal)
        && value.partial_cmp_same(max) == Some(Ordering::Equal)
    {
        RsResult::All
    } else {
        RsResult::Some
    }
}

/// Shared shape of `>` / `>=` / `<` / `<=` over `[min, max]`.
fn compare_result(
    bounds: &PackBounds,
    value: &ScalarValue,
    or_equal: bool,
    direction: Ordering,
) -> RsResult {
    let (min, max) = match (&bounds.min, &bounds.max) {
        (Some(min), Some(max)) => (min, max),
        _ => return RsResult::None,
    };
    // For `col > value`: if min > value the whole pack passes; if max <= value
    // none does. Mirror for Less by flipping the comparisons.
    let (low, high) = match direction {
        Ordering::Greater => (min, max),
        Ordering::Less => (max, min),
        Ordering::Equal => unreachable!("comparison direction is never Equal"),
    };
    let low_cmp = match low.partial_cmp_same(value) {
        Some(ordering) => ordering,
        None => return RsResult::Some,
    };
    let high_cmp = match high.partial_cmp_same(value) {
        Some(ordering) => ordering,
        None => return RsResult::Some,
    };
    let passes = |ordering: Ordering| ordering == direction || (or_equal && ordering == Ordering::Equal);
    if passes(low_cmp) {
        RsResult::All
    } else if !passes(high_cmp) {
        RsResult::None
    } else {
        RsResult::Some
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array};
    use std::sync::Arc;

    fn index_over(packs: Vec<Vec<Option<i64>>>) -> FxHashMap<ColId, MinMaxIndex> {
        let mut index = MinMaxIndex::default();
        for pack in packs {
            let array: ArrayRef = Arc::new(Int64Array::from(pack));
            index.push_pack(&array).unwrap();
        }
        let mut map = FxHashMap::default();
        map.insert(1, index);
        map
    }

    #[test]
    fn equal_three_valued() {
        // Pack 0: [1..9], pack 1: [5..5], pack 2: [20..30]
        let indexes = index_over(vec![
            vec![Some(1), Some(9)],
            vec![Some(5), Some(5)],
            vec![Some(20), Some(30)],
        ]);
        let op = RsOperator::Equal {
            col: 1,
            value: ScalarValue::Int(5),
        };
        assert_eq!(op.evaluate(&indexes, 0), RsResult::Some);
        assert_eq!(op.evaluate(&indexes, 1), RsResult::All);
        assert_eq!(op.evaluate(&indexes, 2), RsResult::None);
    }

    #[test]
    fn range_operators() {
        let indexes = index_over(vec![vec![Some(10), Some(20)]]);
        let greater = |value, or_equal| RsOperator::Greater {
            col: 1,
            value: ScalarValue::Int(value),
            or_equal,
        };
        let less = |value, or_equal| RsOperator::Less {
            col: 1,
            value: ScalarValue::Int(value),
            or_equal,
        };
        assert_eq!(greater(5, false).evaluate(&indexes, 0), RsResult::All);
        assert_eq!(greater(10, false).evaluate(&indexes, 0), RsResult::Some);
        assert_eq!(greater(10, true).evaluate(&indexes, 0), RsResult::All);
        assert_eq!(greater(20, false).evaluate(&indexes, 0), RsResult::None);
        assert_eq!(less(25, false).evaluate(&indexes, 0), RsResult::All);
        assert_eq!(less(10, false).evaluate(&indexes, 0), RsResult::None);
        assert_eq!(less(10, true).evaluate(&indexes, 0), RsResult::Some);
    }

    #[test]
    fn nulls_downgrade_all() {
        let indexes = index_over(vec![vec![Some(10), None, Some(20)]]);
        let op = RsOperator::Greater {
            col: 1,
            value: ScalarValue::Int(0),
            or_equal: false,
        };
        // Value-wise the pack passes entirely, but the null row doesn't.
        assert_eq!(op.evaluate(&indexes, 0), RsResult::Some);
    }

    #[test]
    fn and_or_not_combinators() {
        let indexes = index_over(vec![vec![Some(10), Some(20)]]);
        let all = RsOperator::Greater {
            col: 1,
            value: ScalarValue::Int(0),
            or_equal: false,
        };
        let none = RsOperator::Less {
            col: 1,
            value: ScalarValue::Int(0),
            or_equal: false,
        };
        let and = RsOperator::And(vec![all.clone(), none.clone()]);
        let or = RsOperator::Or(vec![all.clone(), none.clone()]);
        assert_eq!(and.evaluate(&indexes, 0), RsResult::None);
        assert_eq!(or.evaluate(&indexes, 0), RsResult::All);
        assert_eq!(
            RsOperator::Not(Box::new(none)).evaluate(&indexes, 0),
            RsResult::All
        );
        assert_eq!(
            RsOperator::Unsupported.evaluate(&indexes, 0),
            RsResult::Some
        );
    }

    #[test]
    fn missing_index_is_some() {
        let indexes = index_over(vec![vec![Some(1)]]);
        let op = RsOperator::Equal {
            col: 99,
            value: ScalarValue::Int(1),
        };
        assert_eq!(op.evaluate(&indexes, 0), RsResult::Some);
    }

    #[test]
    fn is_null_cases() {
        let indexes = index_over(vec![
            vec![Some(1), Some(2)],
            vec![Some(1), None],
            vec![None, None],
        ]);
        let op = RsOperator::IsNull { col: 1 };
        assert_eq!(op.evaluate(&indexes, 0), RsResult::None);
        assert_eq!(op.evaluate(&indexes, 1), RsResult::Some);
        assert_eq!(op.evaluate(&indexes, 2), RsResult::All);
    }
}
