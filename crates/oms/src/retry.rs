//! Bounded retry with exponential backoff and jitter.
//!
//! Only the delay schedule lives here; the retry loops themselves are
//! explicit in the order manager so shutdown and timeouts can interrupt
//! them cleanly.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1)
    /// capped at `max_delay`, plus up to 10% uniform jitter so synchronized
    /// retries against a struggling broker spread out.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = raw.min(self.max_delay);
        if capped.is_zero() {
            return capped;
        }
        let jitter_micros = rand::thread_rng().gen_range(0..=capped.as_micros() as u64 / 10);
        capped + Duration::from_micros(jitter_micros)
    }

    /// Are there attempts left after `attempt` failures?
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
