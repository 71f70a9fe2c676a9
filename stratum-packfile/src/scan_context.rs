//! Shared per-scan observability counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every reader of one logical scan. All updates are
/// relaxed; the numbers feed logs and system tables, not control flow.
#[derive(Debug, Default)]
pub struct ScanContext {
    pub skipped_packs: AtomicU64,
    pub skipped_rows: AtomicU64,
    pub scanned_packs: AtomicU64,
    pub scanned_rows: AtomicU64,
    pub read_bytes: AtomicU64,
    pub column_cache_hit_packs: AtomicU64,
    pub column_cache_miss_packs: AtomicU64,
    /// Packs whose implicit columns were materialized as constants.
    pub clean_read_packs: AtomicU64,
}

impl ScanContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_skipped(&self, packs: u64, rows: u64) {
        self.skipped_packs.fetch_add(packs, Ordering::Relaxed);
        self.skipped_rows.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_scanned(&self, packs: u64, rows: u64) {
        self.scanned_packs.fetch_add(packs, Ordering::Relaxed);
        self.scanned_rows.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn add_read_bytes(&self, bytes: u64) {
        self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn skipped_rows(&self) -> u64 {
        self.skipped_rows.load(Ordering::Relaxed)
    }

    pub fn scanned_rows(&self) -> u64 {
        self.scanned_rows.load(Ordering::Relaxed)
    }

    pub fn read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }
}
