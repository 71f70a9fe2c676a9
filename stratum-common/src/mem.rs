//! Hierarchical memory accounting: per-query trackers chain to a per-user
//! tracker which chains to the process tracker. Every allocation path that
//! can grow unboundedly (join build, page buffers) reserves here first.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use stratum_result::{Error, Result};

pub struct MemoryTracker {
    name: String,
    /// 0 means unlimited.
    limit: i64,
    used: AtomicI64,
    parent: Option<Arc<MemoryTracker>>,
}

impl MemoryTracker {
    pub fn root(name: impl Into<String>, limit: i64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            limit,
            used: AtomicI64::new(0),
            parent: None,
        })
    }

    pub fn child(self: &Arc<Self>, name: impl Into<String>, limit: i64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            limit,
            used: AtomicI64::new(0),
            parent: Some(Arc::clone(self)),
        })
    }

    pub fn used(&self) -> i64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Account `bytes` against this tracker and every ancestor. If any level
    /// would exceed its cap, the whole reservation is rolled back and
    /// `MemoryLimitExceeded` is returned.
    pub fn try_alloc(self: &Arc<Self>, bytes: usize) -> Result<()> {
        let bytes = bytes as i64;
        let mut charged: Vec<&MemoryTracker> = Vec::new();
        let mut cur: Option<&Arc<MemoryTracker>> = Some(self);
        while let Some(tracker) = cur {
            let new_used = tracker.used.fetch_add(bytes, Ordering::AcqRel) + bytes;
            if tracker.limit > 0 && new_used > tracker.limit {
                tracker.used.fetch_sub(bytes, Ordering::AcqRel);
                for t in charged {
                    t.used.fetch_sub(bytes, Ordering::AcqRel);
                }
                return Err(Error::MemoryLimitExceeded(format!(
                    "tracker {} would use {} of {} bytes",
                    tracker.name, new_used, tracker.limit
                )));
            }
            charged.push(tracker.as_ref());
            cur = tracker.parent.as_ref();
        }
        Ok(())
    }

    pub fn release(&self, bytes: usize) {
        let bytes = bytes as i64;
        let mut cur = Some(self);
        while let Some(tracker) = cur {
            tracker.used.fetch_sub(bytes, Ordering::AcqRel);
            cur = tracker.parent.as_deref();
        }
    }

    /// Reserve bytes, releasing them when the guard drops.
    pub fn reserve(self: &Arc<Self>, bytes: usize) -> Result<MemoryReservation> {
        self.try_alloc(bytes)?;
        Ok(MemoryReservation {
            tracker: Arc::clone(self),
            bytes,
        })
    }
}

/// RAII reservation against a [`MemoryTracker`] chain.
pub struct MemoryReservation {
    tracker: Arc<MemoryTracker>,
    bytes: usize,
}

impl MemoryReservation {
    /// Grow the reservation in place.
    pub fn grow(&mut self, additional: usize) -> Result<()> {
        self.tracker.try_alloc(additional)?;
        self.bytes += additional;
        Ok(())
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}
