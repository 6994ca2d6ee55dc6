//! Periodic expiry sweep for [`ExpiringRegistry`] instances.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ExpiringRegistry, RegistryKey, RegistryValue, Result};
use crate::tenant::{self, Tenant};
use crate::utils::shutdown::Shutdown;

/// Sweeps expired entries across all tenants of one registry.
pub struct Sweeper<K, V> {
    name: String,
    registry: Arc<dyn ExpiringRegistry<K, V>>,
    every: Duration,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: RegistryKey, V: RegistryValue> Sweeper<K, V> {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<dyn ExpiringRegistry<K, V>>,
        every: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            every,
            _marker: PhantomData,
        }
    }

    /// Remove every entry expired at `now`, across tenants.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<Vec<(Tenant, K, V)>> {
        let mut expired = Vec::new();
        for t in self.registry.tenants().await? {
            for (k, v) in self.registry.pop_expired(&t, now).await? {
                expired.push((t.clone(), k, v));
            }
        }
        if !expired.is_empty() {
            debug!(registry = %self.name, count = expired.len(), "Swept expired entries");
        }
        Ok(expired)
    }

    /// Sweep on every interval until shutdown.
    ///
    /// `on_expired` runs inside the entry's tenant scope and typically emits
    /// an end/expire event.
    pub async fn run<F, Fut>(self, shutdown: Shutdown, on_expired: F)
    where
        F: Fn(Tenant, K, V) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!(registry = %self.name, every = ?self.every, "Starting registry sweeper");

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => {
                    info!(registry = %self.name, "Registry sweeper stopped");
                    return;
                }
            }

            match self.sweep_once(Utc::now()).await {
                Ok(expired) => {
                    for (t, k, v) in expired {
                        tenant::scope(t.clone(), on_expired(t, k, v)).await;
                    }
                }
                Err(e) => {
                    warn!(registry = %self.name, error = %e, "Registry sweep failed");
                }
            }
        }
    }
}
