//! Character map presence.
//!
//! Fed by map enter/exit and character map-change events. Map events are keyed
//! by map, not by character, so an exit can arrive after the character's next
//! enter; an exit only clears presence on the map it names.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::{InMemoryRegistry, Result, TenantRegistry};
use crate::tenant::Tenant;

/// Where one character is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub world_id: u8,
    pub channel_id: u8,
    pub map_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Uuid>,
}

impl Location {
    pub fn new(world_id: u8, channel_id: u8, map_id: u32) -> Self {
        Self {
            world_id,
            channel_id,
            map_id,
            instance: None,
        }
    }
}

/// Registry-backed presence table keyed by character id.
#[derive(Clone)]
pub struct Presence {
    registry: Arc<dyn TenantRegistry<u32, Location>>,
}

impl Presence {
    pub fn new(registry: Arc<dyn TenantRegistry<u32, Location>>) -> Self {
        Self { registry }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRegistry::new()))
    }

    pub async fn enter(&self, tenant: &Tenant, character_id: u32, location: Location) -> Result<()> {
        self.registry.put(tenant, character_id, location).await
    }

    /// Clear presence if the character is still recorded on `map_id`.
    pub async fn exit(&self, tenant: &Tenant, character_id: u32, map_id: u32) -> Result<bool> {
        match self.registry.get(tenant, &character_id).await? {
            Some(current) if current.map_id == map_id => {
                self.registry.remove(tenant, &character_id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Forget the character entirely (logout).
    pub async fn leave(&self, tenant: &Tenant, character_id: u32) -> Result<Option<Location>> {
        self.registry.remove(tenant, &character_id).await
    }

    pub async fn location(&self, tenant: &Tenant, character_id: u32) -> Result<Option<Location>> {
        self.registry.get(tenant, &character_id).await
    }

    /// Characters on any of `maps`, outside instances.
    pub async fn on_maps(&self, tenant: &Tenant, maps: &[u32]) -> Result<Vec<(u32, Location)>> {
        let mut found: Vec<(u32, Location)> = self
            .registry
            .entries(tenant)
            .await?
            .into_iter()
            .filter(|(_, loc)| loc.instance.is_none() && maps.contains(&loc.map_id))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        Ok(found)
    }
}
