//! Bus wiring for the rates service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::tracker::RateTracker;
use crate::bus::{handler_fn, BusError, HandlerRegistry};
use crate::envelope::{Envelope, Topic, Topics};

pub const CREATED: &str = "CREATED";
pub const MOVED: &str = "MOVED";
pub const DELETED: &str = "DELETED";
pub const LOGIN: &str = "LOGIN";
pub const LOGOUT: &str = "LOGOUT";

/// Body of an asset status event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetStatus {
    pub character_id: u32,
    pub template_id: u32,
    /// Slot after the event; negative for equipment slots.
    #[serde(default)]
    pub slot: i16,
    #[serde(default)]
    pub old_slot: i16,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SessionStatus {
    world_id: u8,
}

fn decode<T: serde::de::DeserializeOwned>(envelope: &Envelope, handler: &str) -> Option<T> {
    match envelope.decode() {
        Ok(body) => Some(body),
        Err(e) => {
            warn!(handler, key = envelope.key, error = %e, "Discarding malformed event");
            None
        }
    }
}

/// Register asset and session handlers.
pub fn register(registry: &mut HandlerRegistry, topics: &Topics, tracker: &Arc<RateTracker>) {
    let assets = topics.name(Topic::EventAssetStatus);
    let characters = topics.name(Topic::EventCharacterStatus);

    let t = Arc::clone(tracker);
    registry.register(
        assets,
        CREATED,
        "rates.asset_created",
        handler_fn(move |envelope| {
            let tracker = Arc::clone(&t);
            async move {
                let Some(body) = decode::<AssetStatus>(&envelope, "rates.asset_created") else {
                    return Ok(());
                };
                let created_at = body.created_at.unwrap_or_else(Utc::now);
                tracker
                    .item_created(&envelope.tenant, body.character_id, body.template_id, created_at)
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("rates.asset_created", e))
            }
        }),
    );

    let t = Arc::clone(tracker);
    registry.register(
        assets,
        MOVED,
        "rates.asset_moved",
        handler_fn(move |envelope| {
            let tracker = Arc::clone(&t);
            async move {
                let Some(body) = decode::<AssetStatus>(&envelope, "rates.asset_moved") else {
                    return Ok(());
                };
                tracker
                    .item_moved(
                        &envelope.tenant,
                        body.character_id,
                        body.template_id,
                        body.old_slot,
                        body.slot,
                        Utc::now(),
                    )
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("rates.asset_moved", e))
            }
        }),
    );

    let t = Arc::clone(tracker);
    registry.register(
        assets,
        DELETED,
        "rates.asset_deleted",
        handler_fn(move |envelope| {
            let tracker = Arc::clone(&t);
            async move {
                let Some(body) = decode::<AssetStatus>(&envelope, "rates.asset_deleted") else {
                    return Ok(());
                };
                tracker
                    .item_deleted(&envelope.tenant, body.character_id, body.template_id)
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("rates.asset_deleted", e))
            }
        }),
    );

    let t = Arc::clone(tracker);
    registry.register(
        characters,
        LOGIN,
        "rates.login",
        handler_fn(move |envelope| {
            let tracker = Arc::clone(&t);
            async move {
                let body = decode::<SessionStatus>(&envelope, "rates.login").unwrap_or_default();
                let now = Utc::now();
                tracker
                    .login(&envelope.tenant, envelope.key, body.world_id, now)
                    .await
                    .map_err(|e| BusError::handler("rates.login", e))?;
                tracker
                    .initialize(&envelope.tenant, envelope.key, now)
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("rates.login", e))
            }
        }),
    );

    let t = Arc::clone(tracker);
    registry.register(
        characters,
        LOGOUT,
        "rates.logout",
        handler_fn(move |envelope| {
            let tracker = Arc::clone(&t);
            async move {
                tracker
                    .logout(&envelope.tenant, envelope.key, Utc::now())
                    .await
                    .map_err(|e| BusError::handler("rates.logout", e))
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::bus::{DispatchResult, MockEventBus};
    use crate::rates::model::BonusExpTier;
    use crate::rates::{CouponEntry, EquipmentEntry, OwnedAsset, RatesConfig, StaticCatalog, StaticInventory};
    use crate::tenant::Tenant;

    fn wired() -> (HandlerRegistry, Arc<RateTracker>, Tenant) {
        let config = RatesConfig {
            coupons: vec![CouponEntry {
                template_id: 5_211_000,
                multiplier: 2.0,
                duration_mins: 30,
                windows: Vec::new(),
            }],
            equipment: vec![EquipmentEntry {
                template_id: 1_002_357,
                tiers: vec![BonusExpTier {
                    hours_threshold: 0,
                    bonus_pct: 10,
                }],
            }],
            ..RatesConfig::default()
        };
        let catalog = Arc::new(StaticCatalog::from_config(&config));
        let tracker = Arc::new(RateTracker::new(
            config,
            catalog.clone(),
            catalog,
            Arc::new(MockEventBus::new()),
            Topics::default(),
        ));
        let mut registry = HandlerRegistry::new();
        register(&mut registry, &Topics::default(), &tracker);
        (registry, tracker, Tenant::new(Uuid::new_v4(), "GMS", 83, 1))
    }

    #[tokio::test]
    async fn test_asset_created_tracks_coupon() {
        let (registry, tracker, tenant) = wired();
        let now = Utc::now();
        let created = Envelope::new(
            "event.asset.status",
            7,
            tenant.clone(),
            CREATED,
            &json!({ "characterId": 7, "templateId": 5_211_000, "slot": 1, "createdAt": now }),
        )
        .unwrap();

        assert_eq!(registry.dispatch(Arc::new(created)).await, DispatchResult::Success);
        assert_eq!(tracker.rates(&tenant, 7, now).await.unwrap().rates.exp, 2.0);
    }

    #[tokio::test]
    async fn test_equip_move_tracks_item() {
        let (registry, tracker, tenant) = wired();
        let login = Envelope::new("event.character.status", 7, tenant.clone(), LOGIN, &json!({ "worldId": 0 })).unwrap();
        assert_eq!(registry.dispatch(Arc::new(login)).await, DispatchResult::Success);

        let moved = Envelope::new(
            "event.asset.status",
            7,
            tenant.clone(),
            MOVED,
            &json!({ "characterId": 7, "templateId": 1_002_357, "slot": -1, "oldSlot": 4 }),
        )
        .unwrap();
        assert_eq!(registry.dispatch(Arc::new(moved)).await, DispatchResult::Success);

        let rates = tracker.rates(&tenant, 7, Utc::now()).await.unwrap();
        assert_eq!(rates.rates.exp, 1.1);
    }

    #[tokio::test]
    async fn test_login_seeds_owned_coupon() {
        let config = RatesConfig {
            coupons: vec![CouponEntry {
                template_id: 5_360_000,
                multiplier: 2.0,
                duration_mins: 0,
                windows: Vec::new(),
            }],
            ..RatesConfig::default()
        };
        let catalog = Arc::new(StaticCatalog::from_config(&config));
        let inventory = Arc::new(StaticInventory::new());
        inventory
            .give(
                7,
                OwnedAsset {
                    template_id: 5_360_000,
                    slot: 2,
                    created_at: None,
                    equipped_since: None,
                },
            )
            .await;
        let tracker = Arc::new(
            RateTracker::new(config, catalog.clone(), catalog, Arc::new(MockEventBus::new()), Topics::default())
                .with_inventory(inventory),
        );
        let mut registry = HandlerRegistry::new();
        register(&mut registry, &Topics::default(), &tracker);
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);

        let login = Envelope::new("event.character.status", 7, tenant.clone(), LOGIN, &json!({ "worldId": 0 })).unwrap();
        assert_eq!(registry.dispatch(Arc::new(login)).await, DispatchResult::Success);

        assert_eq!(tracker.rates(&tenant, 7, Utc::now()).await.unwrap().rates.drop, 2.0);
    }

    #[tokio::test]
    async fn test_malformed_asset_event_acknowledged() {
        let (registry, _, tenant) = wired();
        let bad = Envelope::new("event.asset.status", 7, tenant, DELETED, &json!({ "templateId": "x" })).unwrap();
        assert_eq!(registry.dispatch(Arc::new(bad)).await, DispatchResult::Success);
    }
}
