use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Duration;

/// Exponent cap, 2^6 = 64 seconds
const MAX_EXPONENT: u32 = 6;
const MAX_BASE_SECS: u64 = 64;
const JITTER_MS: u64 = 400;

/// Base delay without jitter for a given attempt
pub fn base_delay(attempt: u32) -> Duration {
    let secs = 2_u64.pow(attempt.min(MAX_EXPONENT)).min(MAX_BASE_SECS);
    Duration::from_millis(secs * 1000)
}

/// Reconnect delay for an attempt count: capped exponential plus 0..400ms jitter
pub fn next_delay(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..JITTER_MS);
    base_delay(attempt) + Duration::from_millis(jitter)
}

/// Per-client reconnect attempt counter
#[derive(Debug, Default)]
pub struct AttemptCounter(AtomicU32);

impl AttemptCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Current attempt count
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Compute the delay for the current attempt and bump the counter
    pub fn schedule(&self) -> Duration {
        let attempt = self.0.fetch_add(1, Ordering::SeqCst);
        next_delay(attempt)
    }

    /// Reset after a confirmed connection
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}
