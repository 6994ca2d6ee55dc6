//! Tenant-keyed registries.
//!
//! A registry maps `(tenant, key) -> value`. Every accessor takes the tenant
//! explicitly; handlers obtain it from the ambient scope
//! (`crate::tenant::current`). Entries written under one tenant are never
//! visible under another.
//!
//! Contracts shared by all backends:
//! - Writes are last-writer-wins. Callers needing compare-and-set layer it on top.
//! - [`TenantRegistry::entries`] is consistent per entry (no torn values) but
//!   not transactional across entries.
//! - Expiry-bearing registries implement [`ExpiringRegistry`] and are swept
//!   periodically by [`Sweeper`].
//!
//! Implementations:
//! - `InMemoryRegistry`: one reader-writer lock per registry
//! - `RedisRegistry`: keys `{prefix}:{namespace}:{tenant}:{key}` (feature `redis`)

use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::tenant::{Tenant, TenantError};

mod memory;
#[cfg(feature = "redis")]
mod redis;
mod sweeper;

pub use memory::InMemoryRegistry;
#[cfg(feature = "redis")]
pub use self::redis::RedisRegistry;
pub use sweeper::Sweeper;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Key types usable in any backend (rendered as text in Redis).
pub trait RegistryKey: Clone + Eq + Hash + Display + FromStr + Send + Sync + 'static {}

impl<T> RegistryKey for T where T: Clone + Eq + Hash + Display + FromStr + Send + Sync + 'static {}

/// Value types usable in any backend (stored as JSON in Redis).
pub trait RegistryValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> RegistryValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Tenant-scoped key-value registry.
#[async_trait]
pub trait TenantRegistry<K: RegistryKey, V: RegistryValue>: Send + Sync {
    async fn get(&self, tenant: &Tenant, key: &K) -> Result<Option<V>>;

    async fn put(&self, tenant: &Tenant, key: K, value: V) -> Result<()>;

    /// Remove and return the entry, if present.
    async fn remove(&self, tenant: &Tenant, key: &K) -> Result<Option<V>>;

    /// Snapshot of every entry for one tenant.
    async fn entries(&self, tenant: &Tenant) -> Result<Vec<(K, V)>>;

    /// Tenants that currently hold at least one entry.
    async fn tenants(&self) -> Result<Vec<Tenant>>;
}

/// Registry whose entries may carry an expiry instant.
#[async_trait]
pub trait ExpiringRegistry<K: RegistryKey, V: RegistryValue>: TenantRegistry<K, V> {
    /// Store an entry that expires at `expires_at`.
    async fn put_until(&self, tenant: &Tenant, key: K, value: V, expires_at: DateTime<Utc>)
        -> Result<()>;

    /// Remove and return every entry with `expires_at <= now`.
    async fn pop_expired(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<Vec<(K, V)>>;
}
