//! Retry on optimistic-concurrency conflicts.
//!
//! Every mutation of shared cluster state re-reads the object, reapplies its
//! change and writes conditionally on the resource version. When the write
//! loses a race the whole closure runs again, up to `steps` times.

use cluster_store::StoreError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ControllerError;

/// Errors that can report an optimistic-concurrency conflict
pub trait Retryable {
    fn is_conflict(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_conflict(&self) -> bool {
        StoreError::is_conflict(self)
    }
}

impl Retryable for ControllerError {
    fn is_conflict(&self) -> bool {
        ControllerError::is_conflict(self)
    }
}

/// Backoff parameters for conflict retries
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub steps: u32,
    /// Base delay between attempts
    pub duration: Duration,
    /// Multiplier applied to the delay after each attempt
    pub factor: f64,
    /// Up to `jitter * delay` is added to each wait
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            duration: Duration::from_millis(100),
            factor: 1.0,
            jitter: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Same step count, negligible delays
    pub fn immediate(steps: u32) -> Self {
        Self {
            steps,
            duration: Duration::from_millis(1),
            factor: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before attempt `attempt` (1-indexed, first retry is attempt 2)
    fn delay(&self, attempt: u32) -> Duration {
        let growth = self.factor.max(1.0).powi(attempt.saturating_sub(2) as i32);
        let base = self.duration.mul_f64(growth);
        if self.jitter <= 0.0 {
            return base;
        }
        base + base.mul_f64(rand::thread_rng().gen_range(0.0..self.jitter))
    }
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or
/// the policy runs out of steps. The last error is returned.
pub async fn retry_on_conflict<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() && attempt < policy.steps.max(1) => {
                let delay = policy.delay(attempt + 1);
                debug!(
                    "{} hit a conflict (attempt {}/{}), retrying in {:?}: {}",
                    operation_name, attempt, policy.steps, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!("{} still conflicting after {} attempts: {}", operation_name, attempt, e);
                }
                return Err(e);
            }
        }
    }
}
