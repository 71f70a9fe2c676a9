//! Token-bucket rate limiter throttling blob-file reads and writes.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use stratum_result::Result;

use crate::cancel::CancelToken;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiting I/O bytes per second. `request` blocks the calling
/// thread until enough tokens accumulate, observing the cancel token between
/// timed waits so cancellation and deadlines surface promptly.
pub struct IoLimiter {
    refill_per_sec: f64,
    capacity: f64,
    state: Mutex<BucketState>,
    cond: Condvar,
}

impl IoLimiter {
    pub fn new(bytes_per_sec: u64) -> Self {
        assert!(bytes_per_sec > 0);
        let rate = bytes_per_sec as f64;
        Self {
            refill_per_sec: rate,
            capacity: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Consume `bytes` tokens, waiting as needed. Requests larger than the
    /// bucket capacity drain the bucket fully and are then admitted.
    pub fn request(&self, bytes: usize, cancel: &CancelToken) -> Result<()> {
        let want = (bytes as f64).min(self.capacity);
        let mut state = self.state.lock().expect("limiter lock poisoned");
        loop {
            cancel.check()?;
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;

            if state.tokens >= want {
                state.tokens -= want;
                return Ok(());
            }

            let deficit = want - state.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_per_sec)
                .min(Duration::from_millis(100));
            let (guard, _) = self
                .cond
                .wait_timeout(state, wait)
                .expect("limiter lock poisoned");
            state = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_requests_pass_through() {
        let limiter = IoLimiter::new(1 << 30);
        let cancel = CancelToken::new();
        for _ in 0..100 {
            limiter.request(4096, &cancel).unwrap();
        }
    }

    #[test]
    fn cancelled_request_returns_promptly() {
        let limiter = IoLimiter::new(1);
        let cancel = CancelToken::new();
        // Drain the bucket so the next request must wait.
        limiter.request(1, &cancel).unwrap();
        cancel.cancel();
        assert!(limiter.request(1 << 20, &cancel).is_err());
    }
}
