//! Process-local registry behind a single reader-writer lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ExpiringRegistry, RegistryKey, RegistryValue, Result, TenantRegistry};
use crate::tenant::Tenant;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory registry.
pub struct InMemoryRegistry<K, V> {
    tenants: RwLock<HashMap<Tenant, HashMap<K, Entry<V>>>>,
}

impl<K, V> InMemoryRegistry<K, V> {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: RegistryKey, V: RegistryValue> TenantRegistry<K, V> for InMemoryRegistry<K, V> {
    async fn get(&self, tenant: &Tenant, key: &K) -> Result<Option<V>> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant)
            .and_then(|entries| entries.get(key))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, tenant: &Tenant, key: K, value: V) -> Result<()> {
        self.tenants
            .write()
            .await
            .entry(tenant.clone())
            .or_default()
            .insert(
                key,
                Entry {
                    value,
                    expires_at: None,
                },
            );
        Ok(())
    }

    async fn remove(&self, tenant: &Tenant, key: &K) -> Result<Option<V>> {
        let mut tenants = self.tenants.write().await;
        let Some(entries) = tenants.get_mut(tenant) else {
            return Ok(None);
        };
        let removed = entries.remove(key).map(|e| e.value);
        if entries.is_empty() {
            tenants.remove(tenant);
        }
        Ok(removed)
    }

    async fn entries(&self, tenant: &Tenant) -> Result<Vec<(K, V)>> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.tenants.read().await.keys().cloned().collect())
    }
}

#[async_trait]
impl<K: RegistryKey, V: RegistryValue> ExpiringRegistry<K, V> for InMemoryRegistry<K, V> {
    async fn put_until(
        &self,
        tenant: &Tenant,
        key: K,
        value: V,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.tenants
            .write()
            .await
            .entry(tenant.clone())
            .or_default()
            .insert(
                key,
                Entry {
                    value,
                    expires_at: Some(expires_at),
                },
            );
        Ok(())
    }

    async fn pop_expired(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<Vec<(K, V)>> {
        let mut tenants = self.tenants.write().await;
        let Some(entries) = tenants.get_mut(tenant) else {
            return Ok(Vec::new());
        };

        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();
        let popped = expired
            .into_iter()
            .filter_map(|k| entries.remove(&k).map(|e| (k, e.value)))
            .collect();

        if entries.is_empty() {
            tenants.remove(tenant);
        }
        Ok(popped)
    }
}
