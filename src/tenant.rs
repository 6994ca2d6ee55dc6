//! Tenant identity and ambient tenant scope.
//!
//! Every unit of work (consumed message, scheduled tick, HTTP lookup) runs
//! inside [`scope`]; leaf code retrieves the tenant with [`current`].

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors raised when the ambient tenant is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TenantError {
    #[error("No tenant in scope")]
    NotInScope,
}

/// A fully isolated game-world realm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub region: String,
    pub major_version: u16,
    pub minor_version: u16,
}

impl Tenant {
    pub fn new(id: Uuid, region: impl Into<String>, major_version: u16, minor_version: u16) -> Self {
        Self {
            id,
            region: region.into(),
            major_version,
            minor_version,
        }
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} v{}.{}]",
            self.id, self.region, self.major_version, self.minor_version
        )
    }
}

tokio::task_local! {
    static CURRENT: Tenant;
}

/// Run `fut` with `tenant` as the ambient tenant.
pub async fn scope<F: Future>(tenant: Tenant, fut: F) -> F::Output {
    CURRENT.scope(tenant, fut).await
}

/// The ambient tenant of the current unit of work.
pub fn current() -> Result<Tenant, TenantError> {
    CURRENT
        .try_with(|t| t.clone())
        .map_err(|_| TenantError::NotInScope)
}
