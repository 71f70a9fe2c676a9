//! Cancellation tokens observed by every blocking wait in the stack.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use stratum_result::{Error, Result};

/// Cooperative cancellation flag plus an optional deadline.
///
/// Cloning shares the flag; cancelling any clone cancels them all. Blocking
/// waits are expected to poll [`CancelToken::check`] between timed waits so
/// cancellation and deadline expiry surface promptly.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Err(Cancelled) once cancelled, Err(Timeout) once past the deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout("deadline elapsed".into()));
            }
        }
        Ok(())
    }
}
