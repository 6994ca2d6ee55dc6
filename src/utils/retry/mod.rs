//! Retry with exponential backoff and full jitter.
//!
//! The delay before retry attempt `n` (1-based) is drawn uniformly from
//! `[0, min(initial * factor^(n-1), cap))`. Retries stop after
//! `max_attempts` total attempts; the last error surfaces to the caller.
//! A shutdown signal interrupts any pending sleep.
//!
//! [`RetryPolicy`] is a `backon` backoff builder, so it plugs straight into
//! `Retryable::retry`.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, Retryable};
use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use super::shutdown::Shutdown;

/// Backoff configuration for transient failures.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Ceiling of the first retry delay.
    pub initial_ms: u64,
    /// Growth of the ceiling per attempt.
    pub factor: f64,
    /// Upper bound of any ceiling.
    pub cap_ms: u64,
    /// Total attempts including the first (0 or 1 = no retries).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 100,
            factor: 2.0,
            cap_ms: 5_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Exclusive upper bound of the delay before retry attempt `attempt` (1-based).
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.initial_ms as f64 * self.factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.cap_ms as f64)
        } else {
            self.cap_ms as f64
        };
        Duration::from_micros((capped.max(0.0) * 1000.0) as u64)
    }

    /// Draw the delay before retry attempt `attempt`, uniform in `[0, ceiling)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt).as_micros() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::rng().random_range(0..ceiling))
    }

    /// Number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }
}

/// Iterator of full-jitter delays produced by [`RetryPolicy`].
#[derive(Debug)]
pub struct FullJitterBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for FullJitterBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries() {
            return None;
        }
        self.attempt += 1;
        Some(self.policy.delay_for_attempt(self.attempt))
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = FullJitterBackoff;

    fn build(self) -> Self::Backoff {
        FullJitterBackoff {
            policy: self,
            attempt: 0,
        }
    }
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("Retry cancelled by shutdown")]
    Cancelled,
}

/// Run `op` under `policy`, retrying errors for which `is_transient` holds.
///
/// `what` names the operation in logs.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    shutdown: &Shutdown,
    what: &str,
    op: F,
    is_transient: P,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let attempts = op
        .retry(policy.clone())
        .when(is_transient)
        .notify(|e: &E, delay: Duration| {
            warn!(operation = %what, error = %e, delay = ?delay, "Transient failure, retrying");
        });

    tokio::select! {
        result = attempts => result.map_err(RetryError::Failed),
        _ = shutdown.cancelled() => Err(RetryError::Cancelled),
    }
}
