//! SQLite saga store.
//!
//! One row per saga holding the full JSON document. `terminal` and
//! `updated_at` are denormalised for the active scan and retention purge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use super::SagaStore;
use crate::saga::model::Saga;
use crate::saga::Result;
use crate::tenant::Tenant;

/// SQLite-backed saga store.
pub struct SqliteSagaStore {
    pool: SqlitePool,
}

impl SqliteSagaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path)).await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        info!(path = %path, "Opened SQLite saga store");
        Ok(store)
    }

    /// Private in-memory database, for tests.
    pub async fn in_memory() -> Result<Self> {
        // A single connection: every new connection to :memory: is a new database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sagas (
                tenant_id TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                tenant TEXT NOT NULL,
                terminal INTEGER NOT NULL DEFAULT 0,
                document TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (tenant_id, transaction_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sagas_terminal ON sagas(terminal, updated_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> Result<(Tenant, Saga)> {
    let tenant: String = row.try_get("tenant")?;
    let document: String = row.try_get("document")?;
    Ok((serde_json::from_str(&tenant)?, serde_json::from_str(&document)?))
}

#[async_trait]
impl SagaStore for SqliteSagaStore {
    async fn insert(&self, tenant: &Tenant, saga: &Saga) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO sagas
                (tenant_id, transaction_id, tenant, terminal, document, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(tenant.id.to_string())
        .bind(saga.transaction_id.to_string())
        .bind(serde_json::to_string(tenant)?)
        .bind(saga.is_terminal())
        .bind(serde_json::to_string(saga)?)
        .bind(saga.created_at.timestamp_millis())
        .bind(saga.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save(&self, tenant: &Tenant, saga: &Saga) -> Result<()> {
        sqlx::query(
            "INSERT INTO sagas
                (tenant_id, transaction_id, tenant, terminal, document, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tenant_id, transaction_id) DO UPDATE SET
                terminal = excluded.terminal,
                document = excluded.document,
                updated_at = excluded.updated_at",
        )
        .bind(tenant.id.to_string())
        .bind(saga.transaction_id.to_string())
        .bind(serde_json::to_string(tenant)?)
        .bind(saga.is_terminal())
        .bind(serde_json::to_string(saga)?)
        .bind(saga.created_at.timestamp_millis())
        .bind(saga.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, tenant: &Tenant, transaction_id: Uuid) -> Result<Option<Saga>> {
        let row = sqlx::query("SELECT document FROM sagas WHERE tenant_id = ? AND transaction_id = ?")
            .bind(tenant.id.to_string())
            .bind(transaction_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, tenant: &Tenant) -> Result<Vec<Saga>> {
        let rows = sqlx::query("SELECT document FROM sagas WHERE tenant_id = ? ORDER BY created_at")
            .bind(tenant.id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Saga> {
                let document: String = row.try_get("document")?;
                Ok(serde_json::from_str(&document)?)
            })
            .collect()
    }

    async fn active(&self) -> Result<Vec<(Tenant, Saga)>> {
        let rows = sqlx::query("SELECT tenant, document FROM sagas WHERE terminal = 0 ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM sagas WHERE terminal = 1 AND updated_at < ?")
            .bind(before.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() as usize)
    }
}
