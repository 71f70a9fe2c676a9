//! Probe-side execution: hash lookups, output assembly with arrow kernels,
//! the residual other-filter pass, and cross join.
//!
//! Left replication goes through `take` over an index vector; right-side
//! gathering goes through `interleave` over `(block, row)` pairs, with a
//! one-row all-null batch at index 0 standing in for misses.

use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, BooleanArray, Int8Array, RecordBatch, UInt32Array};
use arrow::compute::{interleave, take};
use arrow::datatypes::SchemaRef;
use stratum_result::{Error, Result};

use crate::join::{Join, ProbeProcessInfo};
use crate::key::JoinKeyValue;
use crate::map::RowRef;
use crate::{JoinKind, Strictness};

/// One candidate output row before the other-filter pass.
struct Candidate {
    left_row: u32,
    right: Option<RowRef>,
    /// Key of the slot this match came from, for deferred used-marking.
    key: Option<JoinKeyValue>,
    matched: bool,
}

impl Join {
    /// Produce one output block from the probe block's cursor. Left-row
    /// order is preserved within the call. `max_block_size` is a soft bound:
    /// all matches of one left row are always emitted together.
    pub fn join_block(&self, probe: &mut ProbeProcessInfo) -> Result<RecordBatch> {
        self.check_error()?;
        if self.options.kind == JoinKind::Cross {
            return self.cross_join_block(probe);
        }

        let block = probe.block.clone();
        let rows = block.num_rows();
        let key_columns: Vec<ArrayRef> = self
            .options
            .keys
            .iter()
            .map(|desc| Arc::clone(block.column(desc.left_index)))
            .collect();

        // Defer used-marking to the filter pass when an other-filter exists.
        let defer_mark = self.options.other_filter.is_some();
        let mark_on_lookup = self.options.kind.needs_non_joined() && !defer_mark;
        let semi_family = matches!(self.options.kind, JoinKind::Semi | JoinKind::Anti);

        let mut candidates: Vec<Candidate> = Vec::with_capacity(self.options.max_block_size);
        let mut row = probe.start_row;
        while row < rows {
            if candidates.len() >= self.options.max_block_size {
                break;
            }
            let key = self.left_extractor.key_at(&key_columns, row)?;
            let matches = match &key {
                Some(key) => self.maps.lookup(key, mark_on_lookup)?,
                None => None,
            };
            let left_row = row as u32;
            match matches {
                Some(matched_rows) => {
                    // With an other-filter, ANY must consider every match:
                    // the first one may fail the residual predicate.
                    let emit: &[RowRef] =
                        if self.options.strictness == Strictness::Any && !defer_mark {
                            &matched_rows[..1]
                        } else {
                            &matched_rows[..]
                        };
                    for &right in emit {
                        candidates.push(Candidate {
                            left_row,
                            right: Some(right),
                            key: key.clone(),
                            matched: true,
                        });
                    }
                }
                None => {
                    candidates.push(Candidate {
                        left_row,
                        right: None,
                        // Keep the key so NULL-key rows are distinguishable
                        // from plain misses (semi/anti helper semantics).
                        key,
                        matched: false,
                    });
                }
            }
            row += 1;
        }
        probe.start_row = row;
        probe.all_rows_joined_finish = row >= rows;

        let mask = match &self.options.other_filter {
            Some(filter) => {
                // The filter sees fully assembled (left + right) rows.
                let candidate_batch =
                    self.assemble_wide(&block, &candidates, &self.wide_schema(&block))?;
                let mask = filter(&candidate_batch)?;
                if mask.len() != candidates.len() {
                    return Err(Error::LogicalError(
                        "other filter returned a mask of the wrong length".into(),
                    ));
                }
                Some(mask)
            }
            None => None,
        };

        let passes = |i: usize, c: &Candidate| -> bool {
            c.matched
                && mask
                    .as_ref()
                    .map(|m| m.is_valid(i) && m.value(i))
                    .unwrap_or(true)
        };

        // Deferred used-marking: only slots that produced a surviving row.
        if defer_mark && self.options.kind.needs_non_joined() {
            for (i, candidate) in candidates.iter().enumerate() {
                if passes(i, candidate) {
                    if let Some(key) = &candidate.key {
                        self.maps.mark_used(key)?;
                    }
                }
            }
        }

        // Select the final rows per kind.
        let mut finals: Vec<(u32, Option<RowRef>)> = Vec::with_capacity(candidates.len());
        let mut helper: Vec<Option<i8>> = Vec::new();
        let use_helper = semi_family && self.options.match_helper_name.is_some();
        let mut i = 0usize;
        while i < candidates.len() {
            // Group all candidates of one left row.
            let left_row = candidates[i].left_row;
            let group_end = {
                let mut j = i;
                while j < candidates.len() && candidates[j].left_row == left_row {
                    j += 1;
                }
                j
            };
            let null_key = candidates[i].key.is_none() && !candidates[i].matched;
            let mut any_pass = false;
            for j in i..group_end {
                if passes(j, &candidates[j]) {
                    any_pass = true;
                    if matches!(
                        self.options.kind,
                        JoinKind::Inner | JoinKind::Left | JoinKind::Right | JoinKind::Full
                    ) {
                        finals.push((left_row, candidates[j].right));
                        if self.options.strictness == Strictness::Any
                            && self.options.other_filter.is_some()
                        {
                            // ANY keeps only the first surviving match.
                            break;
                        }
                    }
                }
            }
            match self.options.kind {
                JoinKind::Inner | JoinKind::Right => {}
                JoinKind::Left | JoinKind::Full => {
                    if !any_pass {
                        finals.push((left_row, None));
                    }
                }
                JoinKind::Semi => {
                    if use_helper {
                        helper.push(if null_key {
                            None
                        } else {
                            Some(any_pass as i8)
                        });
                        finals.push((left_row, None));
                    } else if any_pass {
                        finals.push((left_row, None));
                    }
                }
                JoinKind::Anti => {
                    if use_helper {
                        helper.push(if null_key {
                            None
                        } else {
                            Some(!any_pass as i8)
                        });
                        finals.push((left_row, None));
                    } else if !any_pass {
                        finals.push((left_row, None));
                    }
                }
                JoinKind::Cross => unreachable!("cross join handled above"),
            }
            i = group_end;
        }

        let schema = self.output_schema(&block.schema());
        self.assemble_final(&block, &finals, &helper, schema)
    }

    /// Schema of the candidate batch the other filter evaluates: all left
    /// columns followed by all right columns, everything nullable.
    fn wide_schema(&self, left_block: &RecordBatch) -> SchemaRef {
        use arrow::datatypes::{Field, Schema};
        let mut fields: Vec<Field> = left_block
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone().with_nullable(true))
            .collect();
        for field in self.right_schema.fields() {
            fields.push(field.as_ref().clone().with_nullable(true));
        }
        Arc::new(Schema::new(fields))
    }

    fn assemble_wide(
        &self,
        left_block: &RecordBatch,
        candidates: &[Candidate],
        schema: &SchemaRef,
    ) -> Result<RecordBatch> {
        let left_indices: Vec<u32> = candidates.iter().map(|c| c.left_row).collect();
        let right_refs: Vec<Option<RowRef>> = candidates.iter().map(|c| c.right).collect();
        let mut arrays = self.take_left_columns(left_block, &left_indices)?;
        arrays.extend(self.gather_right_columns(&right_refs)?);
        Ok(RecordBatch::try_new(Arc::clone(schema), arrays)?)
    }

    fn assemble_final(
        &self,
        left_block: &RecordBatch,
        finals: &[(u32, Option<RowRef>)],
        helper: &[Option<i8>],
        schema: SchemaRef,
    ) -> Result<RecordBatch> {
        let left_indices: Vec<u32> = finals.iter().map(|(row, _)| *row).collect();
        let mut arrays = self.take_left_columns(left_block, &left_indices)?;
        match self.options.kind {
            JoinKind::Semi | JoinKind::Anti => {
                if self.options.match_helper_name.is_some() {
                    arrays.push(Arc::new(Int8Array::from(helper.to_vec())) as ArrayRef);
                }
            }
            _ => {
                let right_refs: Vec<Option<RowRef>> =
                    finals.iter().map(|(_, right)| *right).collect();
                arrays.extend(self.gather_right_columns(&right_refs)?);
            }
        }
        Ok(RecordBatch::try_new(schema, arrays)?)
    }

    fn take_left_columns(
        &self,
        left_block: &RecordBatch,
        indices: &[u32],
    ) -> Result<Vec<ArrayRef>> {
        let index_array = UInt32Array::from(indices.to_vec());
        let mut out = Vec::with_capacity(left_block.num_columns());
        for column in left_block.columns() {
            out.push(take(column.as_ref(), &index_array, None)?);
        }
        Ok(out)
    }

    /// Gather right columns for `refs`, substituting nulls for misses via a
    /// single-row null batch at interleave index 0.
    pub(crate) fn gather_right_columns(&self, refs: &[Option<RowRef>]) -> Result<Vec<ArrayRef>> {
        let blocks = self.blocks.lock().expect("join blocks poisoned").clone();
        let indices: Vec<(usize, usize)> = refs
            .iter()
            .map(|r| match r {
                Some(row_ref) => (row_ref.block as usize + 1, row_ref.row as usize),
                None => (0, 0),
            })
            .collect();

        let mut out = Vec::with_capacity(self.right_schema.fields().len());
        for (col_idx, field) in self.right_schema.fields().iter().enumerate() {
            let null_row: ArrayRef = new_null_array(field.data_type(), 1);
            let mut parts: Vec<&dyn Array> = Vec::with_capacity(blocks.len() + 1);
            parts.push(null_row.as_ref());
            for block in &blocks {
                parts.push(block.column(col_idx).as_ref());
            }
            out.push(interleave(&parts, &indices)?);
        }
        Ok(out)
    }

    /// Cross join: every left row pairs with every retained right row.
    fn cross_join_block(&self, probe: &mut ProbeProcessInfo) -> Result<RecordBatch> {
        let block = probe.block.clone();
        let rows = block.num_rows();
        let blocks = self.blocks.lock().expect("join blocks poisoned").clone();
        let right_rows: usize = blocks.iter().map(|b| b.num_rows()).sum();

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut row = probe.start_row;
        while row < rows {
            if !candidates.is_empty() && candidates.len() >= self.options.max_block_size {
                break;
            }
            if right_rows == 0 {
                if self.options.kind.keeps_unmatched_left() {
                    candidates.push(Candidate {
                        left_row: row as u32,
                        right: None,
                        key: None,
                        matched: false,
                    });
                }
            } else {
                for (block_idx, right_block) in blocks.iter().enumerate() {
                    for right_row in 0..right_block.num_rows() {
                        candidates.push(Candidate {
                            left_row: row as u32,
                            right: Some(RowRef {
                                block: block_idx as u32,
                                row: right_row as u32,
                            }),
                            key: None,
                            matched: true,
                        });
                    }
                }
            }
            row += 1;
        }
        probe.start_row = row;
        probe.all_rows_joined_finish = row >= rows;

        let schema = self.output_schema(&block.schema());
        let mask = match &self.options.other_filter {
            Some(filter) => {
                let wide = self.assemble_wide(&block, &candidates, &self.wide_schema(&block))?;
                Some(filter(&wide)?)
            }
            None => None,
        };
        let finals: Vec<(u32, Option<RowRef>)> = candidates
            .iter()
            .enumerate()
            .filter(|(i, c)| {
                !c.matched
                    || mask
                        .as_ref()
                        .map(|m| m.is_valid(*i) && m.value(*i))
                        .unwrap_or(true)
            })
            .map(|(_, c)| (c.left_row, c.right))
            .collect();
        self.assemble_final(&block, &finals, &[], schema)
    }
}

/// Convenience wrapper used by filter closures: evaluate a boolean column by
/// name on the assembled batch.
pub fn column_as_filter(batch: &RecordBatch, name: &str) -> Result<BooleanArray> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| Error::BadRequest(format!("filter column {name} missing")))?;
    column
        .as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| Error::BadRequest(format!("filter column {name} is not boolean")))
}
