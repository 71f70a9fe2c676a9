//! Streaming reader over one pack file.
//!
//! `read()` is a pull iterator: each call consumes a contiguous run of used
//! packs and materializes one arrow block. Runs are bounded by the row
//! threshold, the one-pack-per-read flag, and a change in the handle
//! rough-result so clean-read runs stay homogeneous.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, RecordBatch};
use arrow::compute::{concat, filter as arrow_filter};
use arrow::datatypes::{Field, Schema, SchemaRef};
use rustc_hash::{FxHashMap, FxHashSet};
use stratum_common::{CancelToken, IoLimiter};
use stratum_result::{Error, Result};
use tracing::trace;

use crate::column::{
    convert_column, new_constant_array, new_null_array, ColumnDefine,
};
use crate::column_cache::{CacheStrategy, ColumnCache};
use crate::config::PackFileConfig;
use crate::file::PackFile;
use crate::format::{
    col_data_file, col_mark_file, col_null_data_file, col_null_mark_file, ColId, DELMARK_COL_ID,
    HANDLE_COL_ID, VERSION_COL_ID,
};
use crate::mark::{decode_marks, MarkCache};
use crate::meta::read_file;
use crate::minmax_index::ScalarValue;
use crate::pack_filter::PackFilter;
use crate::roughset::{RsOperator, RsResult};
use crate::scan_context::ScanContext;
use crate::stream::{ColumnReadStream, FrameReader};
use crate::column::decode_pack;

fn is_cacheable_column(col_id: ColId) -> bool {
    col_id == HANDLE_COL_ID || col_id == VERSION_COL_ID
}

/// Builder collecting the read options before streams are opened.
pub struct PackFileReaderBuilder {
    file: Arc<PackFile>,
    columns: Vec<ColumnDefine>,
    config: PackFileConfig,
    rough_filter: Option<RsOperator>,
    read_packs: Option<FxHashSet<usize>>,
    handle_range: Option<(i64, i64)>,
    max_read_version: u64,
    enable_handle_clean_read: bool,
    enable_del_clean_read: bool,
    mark_cache: Option<Arc<MarkCache>>,
    column_cache: Option<Arc<ColumnCache>>,
    scan: Option<Arc<ScanContext>>,
    read_limiter: Option<Arc<IoLimiter>>,
    cancel: CancelToken,
}

impl PackFileReaderBuilder {
    pub fn new(file: Arc<PackFile>, columns: Vec<ColumnDefine>) -> Self {
        Self {
            file,
            columns,
            config: PackFileConfig::default(),
            rough_filter: None,
            read_packs: None,
            handle_range: None,
            max_read_version: u64::MAX,
            enable_handle_clean_read: false,
            enable_del_clean_read: false,
            mark_cache: None,
            column_cache: None,
            scan: None,
            read_limiter: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: PackFileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rough_filter(mut self, filter: RsOperator) -> Self {
        self.rough_filter = Some(filter);
        self
    }

    pub fn read_packs(mut self, packs: FxHashSet<usize>) -> Self {
        self.read_packs = Some(packs);
        self
    }

    /// Restrict to handles in `[begin, end)`.
    pub fn handle_range(mut self, begin: i64, end: i64) -> Self {
        self.handle_range = Some((begin, end));
        self
    }

    pub fn max_read_version(mut self, version: u64) -> Self {
        self.max_read_version = version;
        self
    }

    pub fn enable_clean_read(mut self, handle: bool, del: bool) -> Self {
        self.enable_handle_clean_read = handle;
        self.enable_del_clean_read = del;
        self
    }

    pub fn mark_cache(mut self, cache: Arc<MarkCache>) -> Self {
        self.mark_cache = Some(cache);
        self
    }

    pub fn column_cache(mut self, cache: Arc<ColumnCache>) -> Self {
        self.column_cache = Some(cache);
        self
    }

    pub fn scan_context(mut self, scan: Arc<ScanContext>) -> Self {
        self.scan = Some(scan);
        self
    }

    pub fn read_limiter(mut self, limiter: Arc<IoLimiter>) -> Self {
        self.read_limiter = Some(limiter);
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Result<PackFileReader> {
        let pack_filter = PackFilter::compute(
            &self.file,
            self.rough_filter.as_ref(),
            self.read_packs.as_ref(),
            self.handle_range,
            Some(self.max_read_version),
            self.config.enable_rough_set_filter,
        );
        let scan = self.scan.unwrap_or_else(|| Arc::new(ScanContext::new()));
        let column_cache = if self.config.enable_column_cache {
            self.column_cache
        } else {
            None
        };

        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c.name.clone(), c.data_type.clone(), true))
            .collect();
        let schema = Arc::new(Schema::new(fields));

        let mut reader = PackFileReader {
            file: self.file,
            columns: self.columns,
            schema,
            config: self.config,
            pack_filter,
            streams: FxHashMap::default(),
            skip_packs_by_column: FxHashMap::default(),
            last_read_from_cache: FxHashMap::default(),
            next_pack_id: 0,
            next_row_offset: 0,
            max_read_version: self.max_read_version,
            enable_handle_clean_read: self.enable_handle_clean_read,
            enable_del_clean_read: self.enable_del_clean_read,
            mark_cache: self.mark_cache,
            column_cache,
            scan,
            read_limiter: self.read_limiter,
            cancel: self.cancel,
        };
        reader.open_streams()?;
        Ok(reader)
    }
}

pub struct PackFileReader {
    file: Arc<PackFile>,
    columns: Vec<ColumnDefine>,
    schema: SchemaRef,
    config: PackFileConfig,
    pack_filter: PackFilter,
    streams: FxHashMap<ColId, ColumnReadStream>,
    /// Packs skipped (constant or cache-served) per column since its last
    /// disk read; forces a seek before the next one.
    skip_packs_by_column: FxHashMap<ColId, usize>,
    last_read_from_cache: FxHashMap<ColId, bool>,
    next_pack_id: usize,
    next_row_offset: u64,
    max_read_version: u64,
    enable_handle_clean_read: bool,
    enable_del_clean_read: bool,
    mark_cache: Option<Arc<MarkCache>>,
    column_cache: Option<Arc<ColumnCache>>,
    scan: Arc<ScanContext>,
    read_limiter: Option<Arc<IoLimiter>>,
    cancel: CancelToken,
}

impl PackFileReader {
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn scan_context(&self) -> Arc<ScanContext> {
        Arc::clone(&self.scan)
    }

    pub fn pack_filter(&self) -> &PackFilter {
        &self.pack_filter
    }

    /// Row offset (within the file) of the next block to be produced.
    pub fn next_row_offset(&self) -> u64 {
        self.next_row_offset
    }

    /// Open a stream per requested column that exists in the file. Missing
    /// columns (post-DDL) get no stream and are synthesized on read.
    fn open_streams(&mut self) -> Result<()> {
        let frame_algo = self.file.meta.frame_checksum();
        for define in &self.columns {
            let Some(stat) = self.file.meta.column_stat(define.id) else {
                continue;
            };
            let mark_path = self.file.col_path(col_mark_file(define.id));
            let mark_key = mark_path.display().to_string();
            let provider = &self.file.provider;
            let load = || -> Result<Vec<crate::mark::Mark>> {
                let bytes = read_file(provider, &mark_path)?;
                decode_marks(&bytes, frame_algo)
            };
            let marks = match &self.mark_cache {
                Some(cache) => cache.get_or_load(&mark_key, load)?,
                None => Arc::new(load()?),
            };
            if marks.len() != self.file.pack_count() {
                return Err(Error::LogicalError(format!(
                    "column {} has {} marks for {} packs",
                    define.id,
                    marks.len(),
                    self.file.pack_count()
                )));
            }

            let data = FrameReader::open(
                provider,
                &self.file.col_path(col_data_file(define.id)),
                frame_algo,
                Some(Arc::clone(&self.scan)),
                self.read_limiter.clone(),
                self.cancel.clone(),
            )?;
            let (null_marks, nulls) = if stat.nullable {
                let null_mark_path = self.file.col_path(col_null_mark_file(define.id));
                let null_key = null_mark_path.display().to_string();
                let load = || -> Result<Vec<crate::mark::Mark>> {
                    let bytes = read_file(provider, &null_mark_path)?;
                    decode_marks(&bytes, frame_algo)
                };
                let null_marks = match &self.mark_cache {
                    Some(cache) => cache.get_or_load(&null_key, load)?,
                    None => Arc::new(load()?),
                };
                let nulls = FrameReader::open(
                    provider,
                    &self.file.col_path(col_null_data_file(define.id)),
                    frame_algo,
                    Some(Arc::clone(&self.scan)),
                    self.read_limiter.clone(),
                    self.cancel.clone(),
                )?;
                (Some(null_marks), Some(nulls))
            } else {
                (None, None)
            };

            self.streams.insert(
                define.id,
                ColumnReadStream {
                    marks,
                    null_marks,
                    data,
                    nulls,
                    avg_size_hint: stat.avg_size,
                },
            );
            self.skip_packs_by_column.insert(define.id, 0);
            self.last_read_from_cache.insert(define.id, false);
        }
        Ok(())
    }

    /// The previous pack was skipped, so the stream cursor is stale.
    fn should_seek(&self, pack_id: usize) -> bool {
        pack_id != 0 && !self.pack_filter.use_packs()[pack_id - 1]
    }

    /// Advance past unused packs, charging their rows to the skip counters.
    /// Returns `false` when the file is exhausted.
    pub fn get_skipped_rows(&mut self, skip_rows: &mut u64) -> bool {
        *skip_rows = 0;
        let use_packs = self.pack_filter.use_packs();
        let pack_stats = &self.file.meta.pack_stats;
        while self.next_pack_id < use_packs.len() && !use_packs[self.next_pack_id] {
            *skip_rows += pack_stats[self.next_pack_id].rows;
            self.scan.add_skipped(1, pack_stats[self.next_pack_id].rows);
            self.next_pack_id += 1;
        }
        self.next_row_offset += *skip_rows;
        self.next_pack_id < use_packs.len()
    }

    /// Skip the block the next `read()` would return. Returns skipped rows.
    pub fn skip_next_block(&mut self) -> u64 {
        let mut skip = 0;
        if !self.get_skipped_rows(&mut skip) {
            return 0;
        }
        let (_, read_packs, read_rows, _, _, _) = self.next_run();
        self.next_pack_id += read_packs;
        self.next_row_offset += read_rows;
        // Stream cursors did not consume these packs; force a seek before
        // the next disk read of every column.
        for skips in self.skip_packs_by_column.values_mut() {
            *skips += read_packs;
        }
        self.scan.add_skipped(read_packs as u64, read_rows);
        read_rows
    }

    /// Measure the contiguous run the next read would consume:
    /// `(start_pack, packs, rows, not_clean_rows, deleted_rows, max_version)`.
    fn next_run(&self) -> (usize, usize, u64, u64, u64, u64) {
        let use_packs = self.pack_filter.use_packs();
        let handle_res = self.pack_filter.handle_res();
        let pack_stats = &self.file.meta.pack_stats;
        let properties = &self.file.meta.properties;

        let start_pack = self.next_pack_id;
        if start_pack >= use_packs.len() {
            return (start_pack, 0, 0, 0, 0, 0);
        }
        let read_pack_limit = if self.config.read_one_pack_every_time {
            1
        } else {
            0
        };
        let expected_handle_res = handle_res[start_pack];

        let mut pack_id = start_pack;
        let mut rows = 0u64;
        let mut not_clean = 0u64;
        let mut deleted = 0u64;
        let mut max_version = 0u64;
        while pack_id < use_packs.len()
            && use_packs[pack_id]
            && (rows as usize) < self.config.rows_threshold_per_read
        {
            if read_pack_limit != 0 && pack_id - start_pack >= read_pack_limit {
                break;
            }
            if self.enable_handle_clean_read && handle_res[pack_id] != expected_handle_res {
                break;
            }
            rows += pack_stats[pack_id].rows;
            not_clean += pack_stats[pack_id].not_clean;
            deleted += properties
                .get(pack_id)
                .map(|p| p.deleted_rows)
                // Unknown properties: assume the pack has deletes so the
                // fast-path never fires incorrectly.
                .unwrap_or(1);
            max_version = max_version.max(self.pack_filter.max_version(pack_id));
            pack_id += 1;
        }
        (start_pack, pack_id - start_pack, rows, not_clean, deleted, max_version)
    }

    /// Read the next block, or `None` at end of file.
    pub fn read(&mut self) -> Result<Option<RecordBatch>> {
        let mut skip = 0;
        if !self.get_skipped_rows(&mut skip) {
            return Ok(None);
        }
        let (start_pack, read_packs, read_rows, not_clean_rows, deleted_rows, run_max_version) =
            self.next_run();
        if read_rows == 0 {
            return Ok(None);
        }
        self.next_pack_id += read_packs;
        self.next_row_offset += read_rows;
        self.scan.add_scanned(read_packs as u64, read_rows);

        let expected_handle_res = self.pack_filter.handle_res()[start_pack];
        let is_fast_scan = self.config.is_fast_scan;

        let clean_read_normal = self.enable_handle_clean_read
            && expected_handle_res == RsResult::All
            && not_clean_rows == 0
            && !is_fast_scan
            && run_max_version <= self.max_read_version;
        let clean_handle_fast = self.enable_handle_clean_read
            && is_fast_scan
            && expected_handle_res == RsResult::All;
        let clean_del_fast =
            self.enable_del_clean_read && is_fast_scan && deleted_rows == 0;

        let rows = read_rows as usize;
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());
        let columns = self.columns.clone();
        for define in &columns {
            let array = if define.id == HANDLE_COL_ID && (clean_read_normal || clean_handle_fast)
            {
                self.scan.clean_read_packs.fetch_add(
                    read_packs as u64,
                    std::sync::atomic::Ordering::Relaxed,
                );
                *self.skip_packs_by_column.entry(define.id).or_insert(0) += read_packs;
                let min_handle = self.pack_filter.min_handle(start_pack).ok_or_else(|| {
                    Error::LogicalError("clean read without a handle index".into())
                })?;
                new_constant_array(&define.data_type, rows, Some(&ScalarValue::Int(min_handle)))?
            } else if define.id == VERSION_COL_ID && clean_read_normal {
                *self.skip_packs_by_column.entry(define.id).or_insert(0) += read_packs;
                let first = self.file.meta.pack_stats[start_pack].first_version;
                new_constant_array(&define.data_type, rows, Some(&ScalarValue::UInt(first)))?
            } else if define.id == DELMARK_COL_ID && (clean_read_normal || clean_del_fast) {
                *self.skip_packs_by_column.entry(define.id).or_insert(0) += read_packs;
                let first = self.file.meta.pack_stats[start_pack].first_tag;
                new_constant_array(
                    &define.data_type,
                    rows,
                    Some(&ScalarValue::UInt(first as u64)),
                )?
            } else if self.streams.contains_key(&define.id) {
                let raw = if self.column_cache.is_some() && is_cacheable_column(define.id) {
                    self.read_column_cached(define, start_pack, read_packs, rows)?
                } else {
                    let array = self.read_column_from_disk(define, start_pack, read_packs)?;
                    self.skip_packs_by_column.insert(define.id, 0);
                    array
                };
                convert_column(raw, define)?
            } else {
                // Column missing from this file (added by DDL after it was
                // written): synthesize the declared default.
                trace!(col_id = define.id, "column not in file, using default");
                match (&define.default, define.nullable) {
                    (Some(value), _) => new_constant_array(&define.data_type, rows, Some(value))?,
                    (None, true) => new_null_array(&define.data_type, rows),
                    (None, false) => new_constant_array(&define.data_type, rows, None)?,
                }
            };
            arrays.push(array);
        }

        let batch = RecordBatch::try_new(self.schema(), arrays)
            .map_err(|e| Error::Arrow(e).context(format!("file {}", self.file.dir.display())))?;
        Ok(Some(batch))
    }

    /// Column-cache read path: memory segments copy from cache, disk
    /// segments read and re-populate it.
    fn read_column_cached(
        &mut self,
        define: &ColumnDefine,
        start_pack: usize,
        read_packs: usize,
        rows: usize,
    ) -> Result<ArrayRef> {
        let cache = Arc::clone(self.column_cache.as_ref().expect("cache checked"));
        let file_id = self.file.file_id();
        let strategy = cache.read_strategy(&file_id, define.id, start_pack, read_packs);

        let mut parts: Vec<ArrayRef> = Vec::new();
        for (range, action) in &strategy {
            match action {
                CacheStrategy::Memory => {
                    for pack_id in range.clone() {
                        let array =
                            cache.get(&file_id, define.id, pack_id).ok_or_else(|| {
                                Error::LogicalError("cache dropped a pack mid-read".into())
                            })?;
                        self.scan
                            .column_cache_hit_packs
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        parts.push(array);
                    }
                    *self.skip_packs_by_column.entry(define.id).or_insert(0) +=
                        range.len();
                    self.last_read_from_cache.insert(define.id, true);
                }
                CacheStrategy::Disk => {
                    let array =
                        self.read_column_from_disk(define, range.start, range.len())?;
                    self.scan
                        .column_cache_miss_packs
                        .fetch_add(range.len() as u64, std::sync::atomic::Ordering::Relaxed);
                    // Re-populate pack-by-pack so later reads can hit.
                    let mut offset = 0usize;
                    for pack_id in range.clone() {
                        let pack_rows = self.file.meta.pack_stats[pack_id].rows as usize;
                        cache.put(
                            &file_id,
                            define.id,
                            pack_id,
                            array.slice(offset, pack_rows),
                        );
                        offset += pack_rows;
                    }
                    self.skip_packs_by_column.insert(define.id, 0);
                    self.last_read_from_cache.insert(define.id, false);
                    parts.push(array);
                }
            }
        }

        let refs: Vec<&dyn Array> = parts.iter().map(|a| a.as_ref()).collect();
        let merged = concat(&refs)?;
        debug_assert_eq!(merged.len(), rows);
        Ok(merged)
    }

    /// Read `pack_count` packs of one column starting at `start_pack`.
    fn read_column_from_disk(
        &mut self,
        define: &ColumnDefine,
        start_pack: usize,
        pack_count: usize,
    ) -> Result<ArrayRef> {
        let stat = self
            .file
            .meta
            .column_stat(define.id)
            .ok_or_else(|| Error::LogicalError(format!("no stat for column {}", define.id)))?;
        let tag = stat.type_tag;
        let nullable = stat.nullable;
        let force_seek = *self.last_read_from_cache.get(&define.id).unwrap_or(&false);
        let pending_skips = *self.skip_packs_by_column.get(&define.id).unwrap_or(&0);
        let need_seek = force_seek || pending_skips > 0 || self.should_seek(start_pack);

        let stream = self
            .streams
            .get_mut(&define.id)
            .ok_or_else(|| Error::LogicalError(format!("no stream for column {}", define.id)))?;
        if need_seek {
            stream.seek_to_pack(start_pack)?;
        }

        let mut parts: Vec<ArrayRef> = Vec::with_capacity(pack_count);
        for pack_id in start_pack..start_pack + pack_count {
            let rows = self.file.meta.pack_stats[pack_id].rows as usize;
            let body = stream.data.read_pack_body().map_err(|e| {
                e.context(format!(
                    "column {} pack {pack_id} in {}",
                    define.id,
                    self.file.dir.display()
                ))
            })?;
            let nulls = if nullable {
                let null_stream = stream.nulls.as_mut().ok_or_else(|| {
                    Error::LogicalError(format!("column {} lacks a null stream", define.id))
                })?;
                Some(null_stream.read_pack_body()?)
            } else {
                None
            };
            parts.push(decode_pack(tag, &body, rows, nulls.as_deref())?);
        }
        self.last_read_from_cache.insert(define.id, false);

        if parts.len() == 1 {
            return Ok(parts.pop().expect("one part"));
        }
        let refs: Vec<&dyn Array> = parts.iter().map(|a| a.as_ref()).collect();
        Ok(concat(&refs)?)
    }

    /// Late-materialization read: `filter` is aligned with the rows the next
    /// natural block would cover. Packs whose slice of the filter is all
    /// zero are skipped for this call only; surviving packs are read and
    /// filtered.
    pub fn read_with_filter(&mut self, filter: &BooleanArray) -> Result<Option<RecordBatch>> {
        let mut skip = 0;
        if !self.get_skipped_rows(&mut skip) {
            return Ok(None);
        }
        let pack_rows: Vec<u64> = self.file.meta.pack_stats.iter().map(|s| s.rows).collect();
        let pack_count = pack_rows.len();

        // Find the span of packs the filter covers.
        let mut span_end = self.next_pack_id;
        let mut covered_rows = 0u64;
        while span_end < pack_count
            && covered_rows + pack_rows[span_end] <= filter.len() as u64
        {
            covered_rows += pack_rows[span_end];
            span_end += 1;
        }
        if covered_rows != filter.len() as u64 {
            return Err(Error::LogicalError(format!(
                "row filter of {} rows does not align with pack boundaries",
                filter.len()
            )));
        }

        // Turn off packs whose filter slice has no set bit, for this call.
        let start_pack = self.next_pack_id;
        let mut saved_flags: Vec<(usize, bool)> = Vec::new();
        {
            let use_packs = self.pack_filter.use_packs_mut();
            let mut row_offset = 0usize;
            for pack_id in start_pack..span_end {
                let rows = pack_rows[pack_id] as usize;
                if use_packs[pack_id] {
                    let slice = filter.slice(row_offset, rows);
                    if slice.true_count() == 0 {
                        saved_flags.push((pack_id, true));
                        use_packs[pack_id] = false;
                    }
                }
                row_offset += rows;
            }
            // Stop read() from running past the filter's span.
            if span_end < pack_count {
                saved_flags.push((span_end, use_packs[span_end]));
                use_packs[span_end] = false;
            }
        }

        let restore = |this: &mut Self, saved: &[(usize, bool)]| {
            let use_packs = this.pack_filter.use_packs_mut();
            for &(pack_id, flag) in saved {
                use_packs[pack_id] = flag;
            }
        };

        let result = (|| -> Result<Vec<RecordBatch>> {
            let mut blocks = Vec::new();
            let mut filter_offset = 0usize;
            let mut pack_id = start_pack;
            while pack_id < span_end {
                if !self.pack_filter.use_packs()[pack_id] {
                    filter_offset += pack_rows[pack_id] as usize;
                    pack_id += 1;
                    // Keep the reader's cursor in sync with skipped packs.
                    if self.next_pack_id < pack_id {
                        let mut _skip = 0;
                        self.get_skipped_rows(&mut _skip);
                    }
                    continue;
                }
                let block = self
                    .read()?
                    .ok_or_else(|| Error::LogicalError("reader exhausted mid-filter".into()))?;
                let block_rows = block.num_rows();
                let slice = filter.slice(filter_offset, block_rows);
                filter_offset += block_rows;
                let passed = slice.true_count();
                let block = if passed != block_rows {
                    filter_record_batch(&block, &slice)?
                } else {
                    block
                };
                blocks.push(block);
                // read() advanced next_pack_id; resync our cursor.
                pack_id = self.next_pack_id.max(pack_id + 1);
            }
            Ok(blocks)
        })();

        restore(self, &saved_flags);
        let blocks = result?;
        // Make sure the cursor sits at the end of the filtered span even if
        // trailing packs were all disabled.
        if self.next_pack_id < span_end {
            let behind: u64 = (self.next_pack_id..span_end).map(|p| pack_rows[p]).sum();
            self.scan.add_skipped((span_end - self.next_pack_id) as u64, behind);
            self.next_pack_id = span_end;
            self.next_row_offset += behind;
        }

        if blocks.is_empty() {
            // The entire span was filtered out; surface an empty block so
            // the caller keeps its bitmap alignment.
            let empty = RecordBatch::new_empty(self.schema());
            return Ok(Some(empty));
        }
        if blocks.len() == 1 {
            return Ok(Some(blocks.into_iter().next().expect("one block")));
        }
        let schema = blocks[0].schema();
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
        for i in 0..schema.fields().len() {
            let parts: Vec<&dyn Array> = blocks.iter().map(|b| b.column(i).as_ref()).collect();
            arrays.push(concat(&parts)?);
        }
        Ok(Some(RecordBatch::try_new(schema, arrays)?))
    }
}

fn filter_record_batch(batch: &RecordBatch, predicate: &BooleanArray) -> Result<RecordBatch> {
    let mut arrays = Vec::with_capacity(batch.num_columns());
    for column in batch.columns() {
        arrays.push(arrow_filter(column.as_ref(), predicate)?);
    }
    Ok(RecordBatch::try_new(batch.schema(), arrays)?)
}
