//! Persisted saga documents.
//!
//! The orchestrator owns a saga from first persistence to its terminal
//! status; terminal documents are retained so resubmissions stay idempotent,
//! then purged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::model::Saga;
use super::{Result, SagaError};
use crate::registry::{InMemoryRegistry, RegistryError, TenantRegistry};
use crate::tenant::Tenant;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSagaStore;

/// Storage for saga documents keyed by `(tenant, transactionId)`.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Insert a new saga. Returns `false` when the transaction id exists.
    async fn insert(&self, tenant: &Tenant, saga: &Saga) -> Result<bool>;

    /// Overwrite an existing saga.
    async fn save(&self, tenant: &Tenant, saga: &Saga) -> Result<()>;

    async fn get(&self, tenant: &Tenant, transaction_id: Uuid) -> Result<Option<Saga>>;

    /// Every saga of one tenant.
    async fn list(&self, tenant: &Tenant) -> Result<Vec<Saga>>;

    /// Non-terminal sagas across all tenants.
    async fn active(&self) -> Result<Vec<(Tenant, Saga)>>;

    /// Delete terminal sagas last updated before `before`.
    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<usize>;
}

impl From<RegistryError> for SagaError {
    fn from(e: RegistryError) -> Self {
        SagaError::Store(e.to_string())
    }
}

/// Saga store on the in-memory registry.
///
/// The registry is last-writer-wins; inserts are serialized here to give
/// insert-if-absent.
pub struct InMemorySagaStore {
    sagas: Arc<InMemoryRegistry<Uuid, Saga>>,
    insert_lock: Mutex<()>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self {
            sagas: Arc::new(InMemoryRegistry::new()),
            insert_lock: Mutex::new(()),
        }
    }
}

impl Default for InMemorySagaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn insert(&self, tenant: &Tenant, saga: &Saga) -> Result<bool> {
        let _guard = self.insert_lock.lock().await;
        if self.sagas.get(tenant, &saga.transaction_id).await?.is_some() {
            return Ok(false);
        }
        self.sagas
            .put(tenant, saga.transaction_id, saga.clone())
            .await?;
        Ok(true)
    }

    async fn save(&self, tenant: &Tenant, saga: &Saga) -> Result<()> {
        self.sagas
            .put(tenant, saga.transaction_id, saga.clone())
            .await?;
        Ok(())
    }

    async fn get(&self, tenant: &Tenant, transaction_id: Uuid) -> Result<Option<Saga>> {
        Ok(self.sagas.get(tenant, &transaction_id).await?)
    }

    async fn list(&self, tenant: &Tenant) -> Result<Vec<Saga>> {
        let mut sagas: Vec<Saga> = self
            .sagas
            .entries(tenant)
            .await?
            .into_iter()
            .map(|(_, s)| s)
            .collect();
        sagas.sort_by_key(|s| s.created_at);
        Ok(sagas)
    }

    async fn active(&self) -> Result<Vec<(Tenant, Saga)>> {
        let mut out = Vec::new();
        for tenant in self.sagas.tenants().await? {
            for (_, saga) in self.sagas.entries(&tenant).await? {
                if !saga.is_terminal() {
                    out.push((tenant.clone(), saga));
                }
            }
        }
        Ok(out)
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut expired: HashMap<Tenant, Vec<Uuid>> = HashMap::new();
        for tenant in self.sagas.tenants().await? {
            for (id, saga) in self.sagas.entries(&tenant).await? {
                if saga.is_terminal() && saga.updated_at < before {
                    expired.entry(tenant.clone()).or_default().push(id);
                }
            }
        }

        let mut purged = 0;
        for (tenant, ids) in expired {
            for id in ids {
                if self.sagas.remove(&tenant, &id).await?.is_some() {
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }
}
