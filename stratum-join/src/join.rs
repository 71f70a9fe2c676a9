//! The join object: build-side state, build/probe coordination, and the
//! error latch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use arrow::array::{Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use stratum_common::{CancelToken, MemoryReservation, MemoryTracker};
use stratum_result::{Error, Result};
use tracing::debug;

use crate::key::{choose_method, JoinMethod, KeyExtractor};
use crate::map::{JoinMaps, RowRef};
use crate::{JoinKind, JoinOptions, Strictness};

struct CoordState {
    build_concurrency: usize,
    active_build: usize,
    probe_concurrency: usize,
    active_probe: usize,
    error: Option<String>,
}

/// Probe-side cursor: one left block consumed across `join_block` calls.
pub struct ProbeProcessInfo {
    pub block: RecordBatch,
    pub start_row: usize,
    pub all_rows_joined_finish: bool,
}

impl ProbeProcessInfo {
    pub fn new(block: RecordBatch) -> Self {
        Self {
            block,
            start_row: 0,
            all_rows_joined_finish: false,
        }
    }

    pub fn reset_block(&mut self, block: RecordBatch) {
        self.block = block;
        self.start_row = 0;
        self.all_rows_joined_finish = false;
    }
}

pub struct Join {
    pub(crate) options: JoinOptions,
    pub(crate) method: JoinMethod,
    pub(crate) maps: JoinMaps,
    pub(crate) right_extractor: KeyExtractor,
    pub(crate) left_extractor: KeyExtractor,
    /// Build blocks, retained for the lifetime of the join. RowRefs index
    /// into this vector; blocks are shared, never copied.
    pub(crate) blocks: Mutex<Vec<Arc<RecordBatch>>>,
    /// Per-build-partition rows that never entered the map (NULL keys, rows
    /// rejected by the right pre-filter). Emitted by the non-joined pass.
    pub(crate) not_inserted: Mutex<Vec<Vec<RowRef>>>,
    pub(crate) right_schema: SchemaRef,
    state: Mutex<CoordState>,
    build_cv: Condvar,
    probe_cv: Condvar,
    cancel: CancelToken,
    total_build_rows: AtomicU64,
    memory: Option<Arc<MemoryTracker>>,
    reservations: Mutex<Vec<MemoryReservation>>,
}

impl Join {
    /// `right_schema` describes the build-side blocks. Must be created
    /// before any `insert_from_block` call.
    pub fn try_new(
        right_schema: SchemaRef,
        options: JoinOptions,
        build_concurrency: usize,
        cancel: CancelToken,
        memory: Option<Arc<MemoryTracker>>,
    ) -> Result<Arc<Self>> {
        if build_concurrency == 0 {
            return Err(Error::BadRequest("build concurrency must be > 0".into()));
        }
        if options.kind != JoinKind::Cross && options.keys.is_empty() {
            return Err(Error::BadRequest(
                "equi-join requires at least one key".into(),
            ));
        }
        let key_types: Vec<DataType> = options
            .keys
            .iter()
            .map(|desc| {
                right_schema
                    .fields()
                    .get(desc.right_index)
                    .map(|f| f.data_type().clone())
                    .ok_or_else(|| {
                        Error::BadRequest(format!(
                            "right key index {} out of range",
                            desc.right_index
                        ))
                    })
            })
            .collect::<Result<_>>()?;
        let collations: Vec<_> = options.keys.iter().map(|d| d.collation).collect();
        let method = if options.kind == JoinKind::Cross {
            JoinMethod::Serialized
        } else {
            choose_method(&key_types, &collations)
        };
        debug!(?method, kind = ?options.kind, "join initialized");

        let shard_count = (build_concurrency * 4).next_power_of_two();
        Ok(Arc::new(Self {
            method,
            maps: JoinMaps::for_method(method, shard_count),
            right_extractor: KeyExtractor::new(method, &options.keys),
            left_extractor: KeyExtractor::new(method, &options.keys),
            blocks: Mutex::new(Vec::new()),
            not_inserted: Mutex::new(vec![Vec::new(); build_concurrency]),
            right_schema,
            state: Mutex::new(CoordState {
                build_concurrency,
                active_build: build_concurrency,
                probe_concurrency: 0,
                active_probe: 0,
                error: None,
            }),
            build_cv: Condvar::new(),
            probe_cv: Condvar::new(),
            cancel,
            total_build_rows: AtomicU64::new(0),
            memory,
            reservations: Mutex::new(Vec::new()),
            options,
        }))
    }

    pub fn method(&self) -> JoinMethod {
        self.method
    }

    pub fn kind(&self) -> JoinKind {
        self.options.kind
    }

    pub fn total_build_input_rows(&self) -> u64 {
        self.total_build_rows.load(Ordering::Relaxed)
    }

    pub fn total_keys(&self) -> usize {
        self.maps.total_keys()
    }

    /// Index one build block. Safe to call from `build_concurrency` threads
    /// with distinct `stream_index` values.
    pub fn insert_from_block(&self, block: &RecordBatch, stream_index: usize) -> Result<()> {
        self.check_error()?;
        if block.num_rows() == 0 {
            return Ok(());
        }
        if let Some(memory) = &self.memory {
            let reservation = memory
                .reserve(block.get_array_memory_size())
                .map_err(|e| e.context("join build block"))?;
            self.reservations
                .lock()
                .expect("join reservations poisoned")
                .push(reservation);
        }

        let stored = Arc::new(block.clone());
        let block_index = {
            let mut blocks = self.blocks.lock().expect("join blocks poisoned");
            blocks.push(Arc::clone(&stored));
            (blocks.len() - 1) as u32
        };
        self.total_build_rows
            .fetch_add(block.num_rows() as u64, Ordering::Relaxed);

        if self.options.kind == JoinKind::Cross {
            return Ok(());
        }

        // Rows rejected by the right pre-filter skip the map but still count
        // as build rows for the non-joined pass.
        let pre_filter_mask = match &self.options.right_pre_filter {
            Some(filter) => Some(filter(block)?),
            None => None,
        };

        let key_columns: Vec<_> = self
            .options
            .keys
            .iter()
            .map(|desc| Arc::clone(block.column(desc.right_index)))
            .collect();

        let any = self.options.strictness == Strictness::Any;
        let track_not_inserted = self.options.kind.needs_non_joined();
        for row in 0..block.num_rows() {
            let row_ref = RowRef {
                block: block_index,
                row: row as u32,
            };
            let rejected = pre_filter_mask
                .as_ref()
                .map(|mask| !(mask.is_valid(row) && mask.value(row)))
                .unwrap_or(false);
            let key = if rejected {
                None
            } else {
                self.right_extractor.key_at(&key_columns, row)?
            };
            match key {
                Some(key) => {
                    self.maps.insert(key, row_ref, any)?;
                }
                None => {
                    if track_not_inserted {
                        self.not_inserted
                            .lock()
                            .expect("join not-inserted poisoned")
                            .get_mut(stream_index)
                            .ok_or_else(|| {
                                Error::BadRequest(format!(
                                    "stream index {stream_index} exceeds build concurrency"
                                ))
                            })?
                            .push(row_ref);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn finish_one_build(&self) {
        let mut state = self.state.lock().expect("join state poisoned");
        debug_assert!(state.active_build > 0);
        state.active_build = state.active_build.saturating_sub(1);
        if state.active_build == 0 {
            debug!(
                rows = self.total_build_input_rows(),
                keys = self.maps.total_keys(),
                "join build finished"
            );
            self.build_cv.notify_all();
        }
    }

    pub fn wait_until_all_build_finished(&self) -> Result<()> {
        let mut state = self.state.lock().expect("join state poisoned");
        loop {
            if let Some(message) = &state.error {
                return Err(Error::LogicalError(message.clone()));
            }
            self.cancel.check()?;
            if state.active_build == 0 {
                return Ok(());
            }
            let (guard, _) = self
                .build_cv
                .wait_timeout(state, Duration::from_millis(50))
                .expect("join state poisoned");
            state = guard;
        }
    }

    pub fn set_probe_concurrency(&self, concurrency: usize) {
        let mut state = self.state.lock().expect("join state poisoned");
        state.probe_concurrency = concurrency;
        state.active_probe = concurrency;
    }

    pub fn probe_concurrency(&self) -> usize {
        self.state.lock().expect("join state poisoned").probe_concurrency
    }

    pub fn finish_one_probe(&self) {
        let mut state = self.state.lock().expect("join state poisoned");
        state.active_probe = state.active_probe.saturating_sub(1);
        if state.active_probe == 0 {
            self.probe_cv.notify_all();
        }
    }

    pub fn wait_until_all_probe_finished(&self) -> Result<()> {
        let mut state = self.state.lock().expect("join state poisoned");
        loop {
            if let Some(message) = &state.error {
                return Err(Error::LogicalError(message.clone()));
            }
            self.cancel.check()?;
            if state.active_probe == 0 {
                return Ok(());
            }
            let (guard, _) = self
                .probe_cv
                .wait_timeout(state, Duration::from_millis(50))
                .expect("join state poisoned");
            state = guard;
        }
    }

    /// Latch the first error; all pending and future waits observe it.
    pub fn meet_error(&self, message: impl Into<String>) {
        let mut state = self.state.lock().expect("join state poisoned");
        if state.error.is_none() {
            state.error = Some(message.into());
        }
        self.build_cv.notify_all();
        self.probe_cv.notify_all();
    }

    pub fn check_error(&self) -> Result<()> {
        self.cancel.check()?;
        let state = self.state.lock().expect("join state poisoned");
        match &state.error {
            Some(message) => Err(Error::LogicalError(message.clone())),
            None => Ok(()),
        }
    }

    pub fn needs_non_joined(&self) -> bool {
        self.options.kind.needs_non_joined()
    }

    /// Schema of probe output blocks for a given left schema.
    pub fn output_schema(&self, left_schema: &SchemaRef) -> SchemaRef {
        let mut fields: Vec<Field> = left_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone().with_nullable(true))
            .collect();
        match self.options.kind {
            JoinKind::Semi | JoinKind::Anti => {
                if let Some(helper) = &self.options.match_helper_name {
                    fields.push(Field::new(helper.clone(), DataType::Int8, true));
                }
            }
            _ => {
                for field in self.right_schema.fields() {
                    fields.push(field.as_ref().clone().with_nullable(true));
                }
            }
        }
        Arc::new(Schema::new(fields))
    }
}
