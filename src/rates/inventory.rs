//! What a character already owns.
//!
//! A character whose factors were never tracked (first login after a
//! restart, or before this service existed) is seeded from their inventory:
//! equipped bonus-exp pieces and owned rate coupons.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::jsonapi::{JsonApiClient, ResolveError};
use crate::tenant::Tenant;

/// One asset as the inventory reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedAsset {
    pub template_id: u32,
    /// Negative for equipment slots.
    pub slot: i16,
    pub created_at: Option<DateTime<Utc>>,
    pub equipped_since: Option<DateTime<Utc>>,
}

impl OwnedAsset {
    pub fn is_equipped(&self) -> bool {
        self.slot < 0
    }
}

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn assets(&self, tenant: &Tenant, character_id: u32) -> Result<Vec<OwnedAsset>, ResolveError>;
}

// ============================================================================
// Static
// ============================================================================

/// Fixed inventories, same for every tenant.
#[derive(Debug, Default)]
pub struct StaticInventory {
    assets: RwLock<HashMap<u32, Vec<OwnedAsset>>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn give(&self, character_id: u32, asset: OwnedAsset) {
        self.assets.write().await.entry(character_id).or_default().push(asset);
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn assets(&self, _tenant: &Tenant, character_id: u32) -> Result<Vec<OwnedAsset>, ResolveError> {
        Ok(self.assets.read().await.get(&character_id).cloned().unwrap_or_default())
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AssetAttributes {
    template_id: u32,
    slot: i16,
    reference_data: HashMap<String, Value>,
}

fn timestamp(data: &HashMap<String, Value>, field: &str) -> Option<DateTime<Utc>> {
    data.get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Inventory over the inventory service
/// (`/api/characters/{id}/inventory?include=compartments,assets`).
pub struct HttpInventory {
    client: JsonApiClient,
}

impl HttpInventory {
    pub const SERVICE: &'static str = "inventory";

    pub fn new(client: JsonApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Inventory for HttpInventory {
    async fn assets(&self, tenant: &Tenant, character_id: u32) -> Result<Vec<OwnedAsset>, ResolveError> {
        let path = format!("characters/{}/inventory?include=compartments,assets", character_id);
        let doc = self.client.fetch::<Value>(tenant, Self::SERVICE, &path).await?;
        Ok(owned_assets(doc.included))
    }
}

fn owned_assets(included: Vec<crate::jsonapi::Resource<Value>>) -> Vec<OwnedAsset> {
    included
        .into_iter()
        .filter(|r| r.kind == "assets")
        .filter_map(|r| match serde_json::from_value::<AssetAttributes>(r.attributes) {
            Ok(a) => Some(OwnedAsset {
                template_id: a.template_id,
                slot: a.slot,
                created_at: timestamp(&a.reference_data, "createdAt"),
                equipped_since: timestamp(&a.reference_data, "equippedSince"),
            }),
            Err(e) => {
                debug!(asset_id = %r.id, error = %e, "Skipping unreadable asset");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::jsonapi::Document;

    #[test]
    fn test_inventory_document_yields_included_assets() {
        let doc: Document<Value> = serde_json::from_value(json!({
            "data": { "type": "inventories", "id": "7", "attributes": { "characterId": 7 } },
            "included": [
                { "type": "compartments", "id": "c1", "attributes": { "type": 1, "capacity": 24 } },
                {
                    "type": "assets", "id": "a1",
                    "attributes": {
                        "templateId": 1002357, "slot": -1,
                        "referenceType": "EQUIPABLE",
                        "referenceData": { "equippedSince": "2025-03-01T08:00:00Z" }
                    }
                },
                {
                    "type": "assets", "id": "a2",
                    "attributes": {
                        "templateId": 5211000, "slot": 3,
                        "referenceType": "CASH",
                        "referenceData": { "createdAt": "2025-03-01T09:30:00Z" }
                    }
                }
            ]
        }))
        .unwrap();

        let assets = owned_assets(doc.included);

        assert_eq!(assets.len(), 2);
        assert!(assets[0].is_equipped());
        assert_eq!(assets[0].equipped_since, Some(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()));
        assert_eq!(assets[1].template_id, 5_211_000);
        assert_eq!(assets[1].created_at, Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap()));
        assert_eq!(assets[1].equipped_since, None);
    }
}
