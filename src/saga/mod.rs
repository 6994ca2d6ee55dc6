//! Saga orchestration.
//!
//! A saga is an ordered list of steps, each naming one action against one
//! owning service. The orchestrator runs steps strictly one at a time:
//! it emits the step's command keyed by the step's subject, registers a
//! one-shot correlator for the expected status event, and returns control
//! to the consumer. When the status arrives (or the step times out) the
//! saga advances, or fails and compensates completed steps in reverse.
//!
//! - `model`: saga document and step states
//! - `actions`: the action table (command, expected status, inverse)
//! - `validation`: shape checks and composite expansion at submit
//! - `store`: persisted saga documents (memory, SQLite)
//! - `resolver`: read-time lookups (guild, route, reactor, validation)
//! - `orchestrator`: execution, correlation, compensation
//! - `messages`: saga topic bodies
//! - `consumer`: bus wiring

use std::collections::HashMap;

use serde::Deserialize;

use crate::bus::BusError;
use crate::envelope::EnvelopeError;
use crate::jsonapi::ResolveError;

pub mod actions;
pub mod consumer;
pub mod messages;
pub mod model;
pub mod orchestrator;
pub mod resolver;
pub mod store;
mod validation;

pub use actions::{Action, ActionKind};
pub use model::{saga_types, Saga, SagaFailure, SagaState, Step, StepStatus};
pub use orchestrator::Orchestrator;
pub use resolver::{HttpResolver, Resolver, StaticResolver, Validation};
pub use store::{InMemorySagaStore, SagaStore};
#[cfg(feature = "sqlite")]
pub use store::SqliteSagaStore;
pub use validation::validate;

/// Result type for saga operations.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Errors that can occur during saga operations.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    #[error("Invalid saga: {0}")]
    InvalidSaga(String),

    #[error("Saga not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Lookup failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Saga store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SagaStoreType {
    #[default]
    Memory,
    Sqlite,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Step timeout when the action has no override.
    pub default_timeout_ms: u64,
    /// Per-action timeout overrides keyed by wire action name (`warp`, `award_mesos`).
    pub timeouts: HashMap<String, u64>,
    /// How long terminal sagas are kept for idempotent resubmission.
    pub retention_secs: u64,
    /// Interval of the retention sweep.
    pub retention_sweep_secs: u64,
    pub store: SagaStoreType,
    pub sqlite_path: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            timeouts: HashMap::new(),
            retention_secs: 3_600,
            retention_sweep_secs: 60,
            store: SagaStoreType::Memory,
            sqlite_path: "sagas.db".to_string(),
        }
    }
}

impl SagaConfig {
    /// Timeout for one step of `action`.
    pub fn timeout_for(&self, action: ActionKind) -> std::time::Duration {
        let ms = self
            .timeouts
            .get(action.as_str())
            .copied()
            .unwrap_or(self.default_timeout_ms);
        std::time::Duration::from_millis(ms)
    }
}
