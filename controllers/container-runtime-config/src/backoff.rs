//! # Exponential Item Backoff
//!
//! Per-key exponential backoff used when a synchronization fails and the
//! key is put back on its queue.
//!
//! Sequence for one key: 5ms, 10ms, 20ms, 40ms, ... capped at 1000s, each
//! with up to 10% random jitter added. A success (or a drop after too many
//! failures) forgets the key and restarts the sequence.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Default first delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default ceiling
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-key exponential failure backoff
#[derive(Debug)]
pub struct ItemExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.1 = up to 10%)
    jitter: f64,
    failures: Mutex<HashMap<String, u32>>,
}

impl Default for ItemExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, 0.1)
    }
}

impl ItemExponentialBackoff {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying it
    pub fn when(&self, key: &str) -> Duration {
        let attempt = {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            let count = failures.entry(key.to_string()).or_insert(0);
            let attempt = *count;
            *count = count.saturating_add(1);
            attempt
        };

        let delay = Self::calculate_for_error_count(attempt, self.base_delay, self.max_delay);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..self.jitter);
        delay.mul_f64(factor)
    }

    /// Number of failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Delay for the `error_count`-th consecutive failure (0-indexed), without jitter
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, base: Duration, max: Duration) -> Duration {
        // 2^31 * 5ms is far beyond any sane cap
        let exponent = error_count.min(31);
        let delay = base.saturating_mul(1u32 << exponent);
        delay.min(max)
    }
}
