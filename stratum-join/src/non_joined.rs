//! Non-joined emission for RIGHT and FULL joins.
//!
//! After every prober finishes, each build row that was never emitted
//! (slots whose `used` flag is still clear, plus the per-partition
//! not-inserted lists of NULL keys and pre-filter rejects) comes out
//! exactly once, joined with all-null left columns. Streams are partitioned by
//! `(index, step)`: stream `i` covers shards `i, i+step, i+2*step, ...` and
//! the not-inserted lists of build partitions congruent to `i`, so parallel
//! consumers cover disjoint shares of the table.

use std::sync::Arc;

use arrow::array::{new_null_array, ArrayRef, RecordBatch};
use arrow::datatypes::SchemaRef;
use stratum_result::{Error, Result};

use crate::join::Join;
use crate::map::RowRef;

pub struct NonJoinedStream {
    join: Arc<Join>,
    output_schema: SchemaRef,
    left_width: usize,
    max_block_size: usize,
    pending: Vec<RowRef>,
    cursor: usize,
}

impl NonJoinedStream {
    /// Valid only after `wait_until_all_probe_finished`. `index` must be
    /// less than `step`.
    pub fn new(
        join: Arc<Join>,
        left_schema: &SchemaRef,
        index: usize,
        step: usize,
        max_block_size: usize,
    ) -> Result<Self> {
        if !join.needs_non_joined() {
            return Err(Error::BadRequest(
                "non-joined stream requires a RIGHT or FULL join".into(),
            ));
        }
        if step == 0 || index >= step {
            return Err(Error::BadRequest(format!(
                "invalid non-joined partition {index}/{step}"
            )));
        }

        let mut pending = Vec::new();
        let shard_count = join.maps.shard_count();
        let mut shard = index;
        while shard < shard_count {
            join.maps.for_each_in_shard(shard, |slot| {
                if !slot.is_used() {
                    pending.extend_from_slice(&slot.rows);
                }
            });
            shard += step;
        }
        {
            let lists = join.not_inserted.lock().expect("join not-inserted poisoned");
            for (stream_index, list) in lists.iter().enumerate() {
                if stream_index % step == index {
                    pending.extend_from_slice(list);
                }
            }
        }

        let output_schema = join.output_schema(left_schema);
        Ok(Self {
            left_width: left_schema.fields().len(),
            output_schema,
            max_block_size,
            join,
            pending,
            cursor: 0,
        })
    }

    /// Rows still to be emitted by this stream.
    pub fn remaining(&self) -> usize {
        self.pending.len() - self.cursor
    }

    /// Next chunk of non-joined rows, or `None` when exhausted.
    pub fn next_block(&mut self) -> Result<Option<RecordBatch>> {
        self.join.check_error()?;
        if self.cursor >= self.pending.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.max_block_size).min(self.pending.len());
        let refs: Vec<Option<RowRef>> = self.pending[self.cursor..end]
            .iter()
            .map(|&r| Some(r))
            .collect();
        self.cursor = end;

        let rows = refs.len();
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.output_schema.fields().len());
        for field in self.output_schema.fields().iter().take(self.left_width) {
            arrays.push(new_null_array(field.data_type(), rows));
        }
        arrays.extend(self.join.gather_right_columns(&refs)?);
        Ok(Some(RecordBatch::try_new(
            Arc::clone(&self.output_schema),
            arrays,
        )?))
    }
}
