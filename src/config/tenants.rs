//! Tenant bootstrap.

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jsonapi::{JsonApiClient, Resource};
use crate::tenant::Tenant;

/// Service name of the tenants registry in `services.endpoints`.
pub const TENANTS_SERVICE: &str = "tenants";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantAttributes {
    region: String,
    major_version: u16,
    minor_version: u16,
}

fn to_tenant(resource: Resource<TenantAttributes>) -> Option<Tenant> {
    match resource.id.parse::<Uuid>() {
        Ok(id) => Some(Tenant::new(
            id,
            resource.attributes.region,
            resource.attributes.major_version,
            resource.attributes.minor_version,
        )),
        Err(_) => {
            warn!(id = %resource.id, "Skipping tenant with malformed id");
            None
        }
    }
}

/// Tenants this process serves.
///
/// Asks the tenants service when one is configured; falls back to the
/// static list on failure or when no service is configured.
pub async fn bootstrap_tenants(fallback: &[Tenant], client: &JsonApiClient) -> Vec<Tenant> {
    if !client.has_service(TENANTS_SERVICE) {
        info!(count = fallback.len(), "Using configured tenants");
        return fallback.to_vec();
    }

    // The tenants list is not itself tenant-scoped; any placeholder works.
    let anonymous = Tenant::new(Uuid::nil(), "", 0, 0);
    match client
        .fetch::<TenantAttributes>(&anonymous, TENANTS_SERVICE, "tenants")
        .await
    {
        Ok(doc) => {
            let tenants: Vec<Tenant> = doc.data.into_vec().into_iter().filter_map(to_tenant).collect();
            info!(count = tenants.len(), "Loaded tenants from tenants service");
            tenants
        }
        Err(e) => {
            warn!(error = %e, count = fallback.len(), "Tenant bootstrap failed, using configured tenants");
            fallback.to_vec()
        }
    }
}
