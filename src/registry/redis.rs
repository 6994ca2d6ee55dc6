//! Redis-backed registry.
//!
//! Layout per namespace:
//! - `{prefix}:{ns}:{tenant}:{key}`: JSON value
//! - `{prefix}:{ns}:{tenant}:_keys`: set of live keys (iteration index)
//! - `{prefix}:{ns}:{tenant}:_expiry`: sorted set of keys scored by expiry millis
//! - `{prefix}:{ns}:_tenants`: set of tenant JSON documents
//!
//! Every operation is per-key; no multi-key transactions are used.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info};

use super::{ExpiringRegistry, RegistryError, RegistryKey, RegistryValue, Result, TenantRegistry};
use crate::tenant::Tenant;

/// Redis registry for one namespace (e.g. `coupon`, `transport:instance`).
pub struct RedisRegistry<K, V> {
    conn: ConnectionManager,
    key_prefix: String,
    namespace: String,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> RedisRegistry<K, V> {
    /// Connect a registry.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `key_prefix` - Prefix for all keys (default: "atlas")
    /// * `namespace` - Registry name within the prefix
    pub async fn new(url: &str, key_prefix: Option<&str>, namespace: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, namespace = %namespace, "Connected to Redis");

        Ok(Self::with_connection(conn, key_prefix, namespace))
    }

    /// Share an existing connection.
    pub fn with_connection(conn: ConnectionManager, key_prefix: Option<&str>, namespace: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.unwrap_or("atlas").to_string(),
            namespace: namespace.to_string(),
            _marker: PhantomData,
        }
    }

    fn tenant_base(&self, tenant: &Tenant) -> String {
        format!("{}:{}:{}", self.key_prefix, self.namespace, tenant.id)
    }

    fn value_key(&self, tenant: &Tenant, key: &str) -> String {
        format!("{}:{}", self.tenant_base(tenant), key)
    }

    fn index_key(&self, tenant: &Tenant) -> String {
        format!("{}:_keys", self.tenant_base(tenant))
    }

    fn expiry_key(&self, tenant: &Tenant) -> String {
        format!("{}:_expiry", self.tenant_base(tenant))
    }

    fn tenants_key(&self) -> String {
        format!("{}:{}:_tenants", self.key_prefix, self.namespace)
    }
}

fn parse_key<K: RegistryKey>(raw: &str) -> Result<K> {
    raw.parse::<K>()
        .map_err(|_| RegistryError::InvalidKey(raw.to_string()))
}

impl<K: RegistryKey, V: RegistryValue> RedisRegistry<K, V> {
    async fn store(&self, tenant: &Tenant, key: &K, value: &V) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw_key = key.to_string();
        let data = serde_json::to_string(value)?;
        let tenant_doc = serde_json::to_string(tenant)?;

        let _: () = conn.set(self.value_key(tenant, &raw_key), data).await?;
        let _: () = conn.sadd(self.index_key(tenant), &raw_key).await?;
        let _: () = conn.sadd(self.tenants_key(), tenant_doc).await?;
        Ok(())
    }

    async fn take(&self, tenant: &Tenant, raw_key: &str) -> Result<Option<V>> {
        let mut conn = self.conn.clone();
        let value_key = self.value_key(tenant, raw_key);
        let data: Option<String> = conn.get(&value_key).await?;
        let _: () = conn.del(&value_key).await?;
        let _: () = conn.srem(self.index_key(tenant), raw_key).await?;
        let _: () = conn.zrem(self.expiry_key(tenant), raw_key).await?;
        match data {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<K: RegistryKey, V: RegistryValue> TenantRegistry<K, V> for RedisRegistry<K, V> {
    async fn get(&self, tenant: &Tenant, key: &K) -> Result<Option<V>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(self.value_key(tenant, &key.to_string())).await?;
        match data {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, tenant: &Tenant, key: K, value: V) -> Result<()> {
        self.store(tenant, &key, &value).await?;
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(self.expiry_key(tenant), key.to_string()).await?;
        Ok(())
    }

    async fn remove(&self, tenant: &Tenant, key: &K) -> Result<Option<V>> {
        self.take(tenant, &key.to_string()).await
    }

    async fn entries(&self, tenant: &Tenant) -> Result<Vec<(K, V)>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.smembers(self.index_key(tenant)).await?;
        let mut out = Vec::with_capacity(keys.len());
        for raw in keys {
            let data: Option<String> = conn.get(self.value_key(tenant, &raw)).await?;
            // Removed between SMEMBERS and GET.
            let Some(data) = data else { continue };
            out.push((parse_key(&raw)?, serde_json::from_str(&data)?));
        }
        Ok(out)
    }

    async fn tenants(&self) -> Result<Vec<Tenant>> {
        let mut conn = self.conn.clone();
        let docs: Vec<String> = conn.smembers(self.tenants_key()).await?;
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(RegistryError::from))
            .collect()
    }
}

#[async_trait]
impl<K: RegistryKey, V: RegistryValue> ExpiringRegistry<K, V> for RedisRegistry<K, V> {
    async fn put_until(
        &self,
        tenant: &Tenant,
        key: K,
        value: V,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.store(tenant, &key, &value).await?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(self.expiry_key(tenant), key.to_string(), expires_at.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn pop_expired(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<Vec<(K, V)>> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = conn
            .zrangebyscore(self.expiry_key(tenant), "-inf", now.timestamp_millis())
            .await?;

        let mut popped = Vec::with_capacity(due.len());
        for raw in due {
            // Only the instance whose ZREM succeeds owns the expiry.
            let claimed: i64 = conn.zrem(self.expiry_key(tenant), &raw).await?;
            if claimed == 0 {
                continue;
            }
            if let Some(value) = self.take(tenant, &raw).await? {
                popped.push((parse_key(&raw)?, value));
            }
        }
        debug!(namespace = %self.namespace, tenant_id = %tenant.id, count = popped.len(), "Popped expired entries");
        Ok(popped)
    }
}

