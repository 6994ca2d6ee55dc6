//! atlas-transports: Transport scheduler service
//!
//! Runs the scheduled routes (ships, trains, subways) on their fixed cycles
//! and the on-demand instance transports.
//!
//! ## Architecture
//! ```text
//! [EVENT_TOPIC_MAP_STATUS] ----------+
//! [EVENT_TOPIC_CHARACTER_STATUS] ----+--> [Presence]
//!                                              |
//!                    tick --> [RouteScheduler] +--> CHANGE_MAP --> [COMMAND_TOPIC_CHARACTER]
//!                                              +--> ARRIVED / DEPARTED --> [EVENT_TOPIC_TRANSPORT_STATUS]
//!
//! [COMMAND_TOPIC_INSTANCE_TRANSPORT] --> [InstanceManager] --warp saga--> [COMMAND_TOPIC_SAGA]
//!                                              +--> [EVENT_TOPIC_INSTANCE_TRANSPORT]
//! ```
//!
//! ## Configuration
//! - ATLAS_CONFIG: Path to the YAML configuration file (routes live under `transport`)
//! - ATLAS__TRANSPORT__TICK_INTERVAL_MS: Scheduler tick
//! - ATLAS__REDIS__URL: Shared registries; in-memory when unset

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use atlas_fabric::bus::{init_event_bus, HandlerRegistry};
use atlas_fabric::config::{bootstrap_tenants, Config};
use atlas_fabric::envelope::Topics;
use atlas_fabric::jsonapi::JsonApiClient;
use atlas_fabric::transport::{consumer, InstanceManager, InstanceRoute, Presence, Route, RouteScheduler};
use atlas_fabric::utils::bootstrap::init_tracing;
use atlas_fabric::utils::shutdown::{self, trigger_on_ctrl_c};

const SERVICE_NAME: &str = "atlas-transports";

#[cfg(feature = "redis")]
async fn shared_state(
    config: &Config,
    url: &str,
    manager: InstanceManager,
) -> Result<(Presence, InstanceManager), Box<dyn std::error::Error>> {
    use atlas_fabric::registry::RedisRegistry;
    use atlas_fabric::transport::instance::PendingWarp;
    use atlas_fabric::transport::{Location, TransportInstance};
    use atlas_fabric::utils::bootstrap::connect_with_retry;
    use uuid::Uuid;

    let prefix = Some(config.redis.key_prefix.as_str());
    let retry = &config.services.retry;
    let presence: RedisRegistry<u32, Location> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "presence")).await?;
    let instances: RedisRegistry<Uuid, TransportInstance> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "transport-instances")).await?;
    let enrollments: RedisRegistry<u32, Uuid> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "transport-enrollments")).await?;
    let pending: RedisRegistry<Uuid, PendingWarp> =
        connect_with_retry("redis", url, retry, || RedisRegistry::new(url, prefix, "transport-pending")).await?;

    Ok((
        Presence::new(Arc::new(presence)),
        manager.with_registries(Arc::new(instances), Arc::new(enrollments), Arc::new(pending)),
    ))
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

    let grace = Duration::from_secs(config.transport.stuck_grace_secs);
    let manager = InstanceManager::new(Arc::clone(&bus), topics.clone(), grace);
    let (presence, manager) = match config.redis.url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => shared_state(&config, url, manager).await?,
        _ => (Presence::in_memory(), manager),
    };
    let manager = Arc::new(manager);
    let scheduler = Arc::new(RouteScheduler::new(Arc::clone(&bus), topics.clone(), presence.clone()));

    for tenant in bootstrap_tenants(&config.tenants, &client).await {
        let Some(configured) = config.transport.for_tenant(tenant.id) else {
            info!(tenant_id = %tenant.id, "No routes configured for tenant");
            continue;
        };
        let routes = configured
            .routes
            .iter()
            .map(|r| Route::from_config(&tenant, r))
            .collect::<Result<Vec<_>, _>>()?;
        let instance_routes = configured
            .instance_routes
            .iter()
            .map(|r| InstanceRoute::from_config(&tenant, r))
            .collect::<Result<Vec<_>, _>>()?;
        scheduler.add_tenant(tenant.clone(), routes).await;
        manager.add_tenant(tenant, instance_routes).await;
    }

    let mut registry = HandlerRegistry::new();
    consumer::register(&mut registry, &topics, &presence, &manager);
    Arc::new(registry).attach(bus.as_ref()).await?;
    bus.start().await?;

    let tick = Duration::from_millis(config.transport.tick_interval_ms);
    let scheduled = tokio::spawn(Arc::clone(&scheduler).run(shutdown.clone(), tick));
    let instances = tokio::spawn(Arc::clone(&manager).run(shutdown.clone(), tick));

    info!(service = SERVICE_NAME, "Service started");
    trigger_on_ctrl_c(trigger).await?;

    scheduled.await?;
    instances.await?;
    info!(service = SERVICE_NAME, "Service stopped");
    Ok(())
}
