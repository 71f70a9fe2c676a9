//! Pack file writer.
//!
//! Consumes arrow blocks, regroups rows into `pack_rows`-sized packs, and
//! emits the column data/mark/null/index files plus metadata in the chosen
//! schema variant. The writer exists so readers have immutable files to
//! open; when a delta segment flushes, the write side produces a new file
//! and never mutates an existing one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt64Array, UInt8Array};
use arrow::compute::concat;
use arrow::record_batch::RecordBatch;
use stratum_common::file_provider::FileProvider;
use stratum_result::{Error, Result};
use tracing::debug;

use crate::column::{encode_null_map, encode_pack, ColumnDefine};
use crate::compress::encode_frame;
use crate::config::PackFileConfig;
use crate::file::encode_index;
use crate::format::{
    col_data_file, col_index_file, col_mark_file, col_null_data_file, col_null_mark_file,
    MetaFormat, TypeTag, DELMARK_COL_ID, HANDLE_COL_ID, VERSION_COL_ID,
};
use crate::mark::{encode_marks, Mark};
use crate::meta::{write_file, ColumnStat, PackFileMeta, PackProperty, PackStat};
use crate::minmax_index::{scalar_at, MinMaxIndex, ScalarValue};

struct ColumnWriterState {
    define: ColumnDefine,
    data: Vec<u8>,
    marks: Vec<Mark>,
    null_data: Vec<u8>,
    null_marks: Vec<Mark>,
    index: MinMaxIndex,
    serialized_bytes: u64,
    rows: u64,
}

pub struct PackFileWriter {
    provider: Arc<dyn FileProvider>,
    dir: PathBuf,
    config: PackFileConfig,
    format: MetaFormat,
    columns: Vec<ColumnWriterState>,
    pending: Vec<RecordBatch>,
    pending_rows: usize,
    pack_stats: Vec<PackStat>,
    properties: Vec<PackProperty>,
    /// Handle of the last row of the previous pack, for `not_clean`.
    prev_pack_last_handle: Option<i64>,
}

impl PackFileWriter {
    /// `columns` must contain the implicit handle, version, and delete-mark
    /// columns; blocks are matched to columns by field name.
    pub fn create(
        provider: Arc<dyn FileProvider>,
        dir: impl AsRef<Path>,
        columns: Vec<ColumnDefine>,
        config: PackFileConfig,
        format: MetaFormat,
    ) -> Result<Self> {
        for required in [HANDLE_COL_ID, VERSION_COL_ID, DELMARK_COL_ID] {
            if !columns.iter().any(|c| c.id == required) {
                return Err(Error::BadRequest(format!(
                    "pack file schema must include implicit column {required}"
                )));
            }
        }
        let dir = dir.as_ref().to_path_buf();
        provider.create_dir_all(&dir)?;
        let columns = columns
            .into_iter()
            .map(|define| ColumnWriterState {
                define,
                data: Vec::new(),
                marks: Vec::new(),
                null_data: Vec::new(),
                null_marks: Vec::new(),
                index: MinMaxIndex::default(),
                serialized_bytes: 0,
                rows: 0,
            })
            .collect();
        Ok(Self {
            provider,
            dir,
            config,
            format,
            columns,
            pending: Vec::new(),
            pending_rows: 0,
            pack_stats: Vec::new(),
            properties: Vec::new(),
            prev_pack_last_handle: None,
        })
    }

    /// Buffer one block; full packs are flushed as they accumulate.
    pub fn write_block(&mut self, block: &RecordBatch) -> Result<()> {
        if block.num_rows() == 0 {
            return Ok(());
        }
        self.pending.push(block.clone());
        self.pending_rows += block.num_rows();
        while self.pending_rows >= self.config.pack_rows {
            self.flush_pack(self.config.pack_rows)?;
        }
        Ok(())
    }

    /// Flush the remaining partial pack and write all files.
    pub fn finalize(mut self) -> Result<PackFileMeta> {
        if self.pending_rows > 0 {
            let rows = self.pending_rows;
            self.flush_pack(rows)?;
        }
        let frame_algo = match self.format {
            MetaFormat::Legacy => stratum_common::checksum::ChecksumAlgo::None,
            _ => self.config.checksum_algorithm,
        };

        let mut column_stats = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let marks = encode_marks(&column.marks, frame_algo)?;
            write_file(
                &self.provider,
                &self.dir.join(col_data_file(column.define.id)),
                &column.data,
            )?;
            write_file(
                &self.provider,
                &self.dir.join(col_mark_file(column.define.id)),
                &marks,
            )?;

            let (null_data_bytes, null_mark_bytes) = if column.define.nullable {
                let null_marks = encode_marks(&column.null_marks, frame_algo)?;
                write_file(
                    &self.provider,
                    &self.dir.join(col_null_data_file(column.define.id)),
                    &column.null_data,
                )?;
                write_file(
                    &self.provider,
                    &self.dir.join(col_null_mark_file(column.define.id)),
                    &null_marks,
                )?;
                (column.null_data.len() as u64, null_marks.len() as u64)
            } else {
                (0, 0)
            };

            let index_bytes = {
                let encoded = encode_index(&column.index, frame_algo)?;
                write_file(
                    &self.provider,
                    &self.dir.join(col_index_file(column.define.id)),
                    &encoded,
                )?;
                encoded.len() as u64
            };

            column_stats.push(ColumnStat {
                col_id: column.define.id,
                type_tag: TypeTag::from_data_type(&column.define.data_type)?,
                nullable: column.define.nullable,
                avg_size: if column.rows > 0 {
                    column.serialized_bytes / column.rows
                } else {
                    0
                },
                serialized_bytes: column.serialized_bytes,
                data_bytes: column.data.len() as u64,
                mark_bytes: marks.len() as u64,
                null_data_bytes,
                null_mark_bytes,
                index_bytes,
            });
        }

        let meta = PackFileMeta {
            format: self.format,
            checksum_algorithm: self.config.checksum_algorithm,
            checksum_frame_length: self.config.checksum_frame_length as u32,
            compression: self.config.compression_method,
            compression_level: self.config.compression_level,
            column_stats,
            pack_stats: self.pack_stats.clone(),
            properties: self.properties.clone(),
        };
        meta.write(&self.provider, &self.dir)?;
        self.provider.sync_dir(&self.dir)?;
        debug!(
            dir = %self.dir.display(),
            packs = meta.pack_count(),
            rows = meta.total_rows(),
            "pack file written"
        );
        Ok(meta)
    }

    /// Cut `rows` rows off the pending blocks and append them as one pack.
    fn flush_pack(&mut self, rows: usize) -> Result<()> {
        let pack = self.take_rows(rows)?;
        let frame_algo = match self.format {
            MetaFormat::Legacy => stratum_common::checksum::ChecksumAlgo::None,
            _ => self.config.checksum_algorithm,
        };

        let handle = column_by_name(&pack, &self.column_name(HANDLE_COL_ID)?)?;
        let version = column_by_name(&pack, &self.column_name(VERSION_COL_ID)?)?;
        let delmark = column_by_name(&pack, &self.column_name(DELMARK_COL_ID)?)?;

        let mut pack_bytes = 0u64;
        for column in self.columns.iter_mut() {
            let array = column_by_name(&pack, &column.define.name)?;
            let encoded = encode_pack(array)?;
            let frame = encode_frame(
                &encoded,
                self.config.compression_method,
                self.config.compression_level,
                frame_algo,
            )?;
            column.marks.push(Mark {
                offset_in_file: column.data.len() as u64,
                offset_in_decompressed: 0,
            });
            column.data.extend_from_slice(&frame);
            column.serialized_bytes += encoded.len() as u64;
            column.rows += rows as u64;
            pack_bytes += encoded.len() as u64;

            if column.define.nullable {
                let nulls = encode_null_map(array);
                let frame = encode_frame(
                    &nulls,
                    self.config.compression_method,
                    self.config.compression_level,
                    frame_algo,
                )?;
                column.null_marks.push(Mark {
                    offset_in_file: column.null_data.len() as u64,
                    offset_in_decompressed: 0,
                });
                column.null_data.extend_from_slice(&frame);
            } else if array.null_count() > 0 {
                return Err(Error::BadRequest(format!(
                    "column {} declared non-nullable but block contains nulls",
                    column.define.name
                )));
            }

            column.index.push_pack(array)?;
        }

        // Pack statistics from the implicit columns.
        let versions = version
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| Error::BadRequest("version column must be UInt64".into()))?;
        let delmarks = delmark
            .as_any()
            .downcast_ref::<UInt8Array>()
            .ok_or_else(|| Error::BadRequest("delete-mark column must be UInt8".into()))?;

        let mut not_clean = 0u64;
        let mut deleted_rows = 0u64;
        let mut gc_hint_version = 0u64;
        let mut prev_handle = self.prev_pack_last_handle.take();
        for row in 0..rows {
            let handle_value = match scalar_at(handle, row)? {
                ScalarValue::Int(v) => v,
                other => {
                    return Err(Error::BadRequest(format!(
                        "handle column must be Int64, found {other:?}"
                    )))
                }
            };
            let deleted = delmarks.value(row) != 0;
            let duplicate = prev_handle == Some(handle_value);
            if deleted {
                deleted_rows += 1;
            }
            if deleted || duplicate {
                not_clean += 1;
                gc_hint_version = gc_hint_version.max(versions.value(row));
            }
            if let Some(prev) = prev_handle {
                if handle_value < prev {
                    return Err(Error::LogicalError(format!(
                        "handle column must be non-decreasing: {prev} then {handle_value}"
                    )));
                }
            }
            prev_handle = Some(handle_value);
        }
        self.prev_pack_last_handle = prev_handle;

        self.pack_stats.push(PackStat {
            rows: rows as u64,
            not_clean,
            first_version: versions.value(0),
            first_tag: delmarks.value(0),
            bytes: pack_bytes,
        });
        self.properties.push(PackProperty {
            gc_hint_version,
            deleted_rows,
        });
        Ok(())
    }

    fn column_name(&self, col_id: i64) -> Result<String> {
        self.columns
            .iter()
            .find(|c| c.define.id == col_id)
            .map(|c| c.define.name.clone())
            .ok_or_else(|| Error::LogicalError(format!("column {col_id} missing from writer")))
    }

    /// Slice `rows` rows out of the pending block queue as one record batch.
    fn take_rows(&mut self, rows: usize) -> Result<RecordBatch> {
        let mut taken: Vec<RecordBatch> = Vec::new();
        let mut remaining = rows;
        while remaining > 0 {
            let block = self
                .pending
                .first()
                .cloned()
                .ok_or_else(|| Error::LogicalError("pending rows accounting is off".into()))?;
            if block.num_rows() <= remaining {
                remaining -= block.num_rows();
                taken.push(block);
                self.pending.remove(0);
            } else {
                taken.push(block.slice(0, remaining));
                self.pending[0] = block.slice(remaining, block.num_rows() - remaining);
                remaining = 0;
            }
        }
        self.pending_rows -= rows;

        if taken.len() == 1 {
            return Ok(taken.pop().expect("one block"));
        }
        let schema = taken[0].schema();
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        for i in 0..schema.fields().len() {
            let parts: Vec<&dyn Array> = taken.iter().map(|b| b.column(i).as_ref()).collect();
            columns.push(concat(&parts)?);
        }
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

fn column_by_name<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::BadRequest(format!("block is missing column {name}")))
}
