//! atlas-rates: Character rate service
//!
//! Tracks the factors behind each character's experience, drop and meso
//! rates and publishes a snapshot whenever they change.
//!
//! ## Architecture
//! ```text
//! [EVENT_TOPIC_ASSET_STATUS] -------+
//! [EVENT_TOPIC_CHARACTER_STATUS] ---+--> [RateTracker] --RATES_CHANGED--> [EVENT_TOPIC_CHARACTER_RATES]
//!                                            ^
//!                                            |
//!                 [data service] cash items / equipment
//!                 [inventory service] owned assets, read on first login
//! ```
//!
//! ## Configuration
//! - ATLAS_CONFIG: Path to the YAML configuration file (rates live under `rates`)
//! - ATLAS__SERVICES__ENDPOINTS__DATA: Data service; the static catalog is used when unset
//! - ATLAS__SERVICES__ENDPOINTS__INVENTORY: Inventory service; characters are not seeded when unset
//! - ATLAS__REDIS__URL: Shared registries; in-memory when unset

use std::sync::Arc;

use tracing::info;

use atlas_fabric::bus::{init_event_bus, HandlerRegistry};
use atlas_fabric::config::Config;
use atlas_fabric::envelope::Topics;
use atlas_fabric::jsonapi::JsonApiClient;
use atlas_fabric::rates::{
    consumer, CashCatalog, EquipmentCatalog, HttpCatalog, HttpInventory, RateTracker, StaticCatalog,
};
use atlas_fabric::utils::bootstrap::init_tracing;
use atlas_fabric::utils::shutdown::{self, trigger_on_ctrl_c};

const SERVICE_NAME: &str = "atlas-rates";
const DATA_SERVICE: &str = "data";

#[cfg(feature = "redis")]
async fn shared_state(config: &Config, url: &str, tracker: RateTracker) -> Result<RateTracker, Box<dyn std::error::Error>> {
    use atlas_fabric::rates::sessions::SessionHistory;
    use atlas_fabric::rates::{Coupon, EquippedItem, ItemKey, Rates, SessionLog};
    use atlas_fabric::registry::RedisRegistry;
    use atlas_fabric::utils::bootstrap::connect_with_retry;

    let prefix = Some(config.redis.key_prefix.as_str());
    let retry = &config.services.retry;
    let coupons: RedisRegistry<ItemKey, Coupon> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "rates-coupons")).await?;
    let equipment: RedisRegistry<ItemKey, EquippedItem> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "rates-equipment")).await?;
    let sessions: RedisRegistry<u32, SessionHistory> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "rates-sessions")).await?;
    let snapshots: RedisRegistry<u32, Rates> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "rates-snapshots")).await?;
    let initialized: RedisRegistry<u32, chrono::DateTime<chrono::Utc>> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "rates-init")).await?;

    Ok(tracker
        .with_registries(Arc::new(coupons), Arc::new(equipment), SessionLog::new(Arc::new(sessions)))
        .with_snapshots(Arc::new(snapshots), Arc::new(initialized)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let topics = Topics::resolve(&config.topics);
    let (trigger, shutdown) = shutdown::channel();

    let bus = init_event_bus(&config.messaging, SERVICE_NAME)
        .await
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;

    let client = JsonApiClient::new(config.services.clone(), shutdown.clone())?;
    let (cash, equipment): (Arc<dyn CashCatalog>, Arc<dyn EquipmentCatalog>) = if client.has_service(DATA_SERVICE) {
        info!(catalog = "http", "Using data service catalog");
        let catalog = Arc::new(HttpCatalog::new(client.clone()));
        (catalog.clone(), catalog)
    } else {
        info!(catalog = "static", coupons = config.rates.coupons.len(), "Using configured catalog");
        let catalog = Arc::new(StaticCatalog::from_config(&config.rates));
        (catalog.clone(), catalog)
    };

    let mut tracker = RateTracker::new(config.rates.clone(), cash, equipment, Arc::clone(&bus), topics.clone());
    if client.has_service(HttpInventory::SERVICE) {
        info!("Seeding characters from the inventory service");
        tracker = tracker.with_inventory(Arc::new(HttpInventory::new(client)));
    }
    let tracker = match config.redis.url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => shared_state(&config, url, tracker).await?,
        _ => tracker,
    };
    let tracker = Arc::new(tracker);

    let mut registry = HandlerRegistry::new();
    consumer::register(&mut registry, &topics, &tracker);
    Arc::new(registry).attach(bus.as_ref()).await?;
    bus.start().await?;

    let sweeper = tokio::spawn(Arc::clone(&tracker).run_sweeper(shutdown.clone()));

    info!(service = SERVICE_NAME, "Service started");
    trigger_on_ctrl_c(trigger).await?;

    sweeper.await?;
    info!(service = SERVICE_NAME, "Service stopped");
    Ok(())
}
