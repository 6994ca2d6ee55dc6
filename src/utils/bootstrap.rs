//! Bootstrap utilities for atlas binaries.
//!
//! Shared initialization code for all service binaries.

use std::future::Future;

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::RetryPolicy;
use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};

/// Initialize tracing with the ATLAS_LOG environment variable.
///
/// Defaults to "info" level if ATLAS_LOG is not set. `ATLAS_LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Connect to a backing service, retrying with full-jitter backoff.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "redis", "sqlite")
/// * `address` - The address being connected to
/// * `policy` - Backoff policy; `max_attempts` bounds the attempts
/// * `connect` - Async function that attempts to establish a connection
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    policy: &RetryPolicy,
    mut connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(client) => {
                tracing::info!(service = %service_name, address = %address, "Connected");
                return Ok(client);
            }
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    service = %service_name,
                    attempt,
                    max_attempts,
                    error = %e,
                    delay = ?delay,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::error!(
                    service = %service_name,
                    attempts = max_attempts,
                    error = %e,
                    "Connection failed"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_with_retry_eventually_connects() {
        let policy = RetryPolicy {
            initial_ms: 1,
            factor: 1.0,
            cap_ms: 1,
            max_attempts: 4,
        };
        let mut calls = 0;
        let result: Result<u32, String> = connect_with_retry("test", "mem://", &policy, || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err("refused".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_connect_with_retry_surfaces_last_error() {
        let policy = RetryPolicy {
            initial_ms: 1,
            factor: 1.0,
            cap_ms: 1,
            max_attempts: 2,
        };
        let result: Result<(), String> =
            connect_with_retry("test", "mem://", &policy, || async { Err("refused".to_string()) })
                .await;
        assert_eq!(result, Err("refused".to_string()));
    }
}
