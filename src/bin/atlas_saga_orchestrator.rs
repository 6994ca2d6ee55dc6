//! atlas-saga-orchestrator: Saga orchestrator service
//!
//! Consumes saga submissions and the status events of every owning service,
//! drives each saga one step at a time, and compensates completed steps when
//! a step fails.
//!
//! ## Architecture
//! ```text
//! [COMMAND_TOPIC_SAGA] --SUBMIT--> [Orchestrator] --command--> [owning service]
//!                                        ^                           |
//!                                        |                           v
//!                                  status events <------- [EVENT_TOPIC_*_STATUS]
//!                                        |
//!                                        v
//!                         [EVENT_TOPIC_SAGA_STATUS] COMPLETED / FAILED
//! ```
//!
//! ## Configuration
//! - ATLAS_CONFIG: Path to the YAML configuration file
//! - ATLAS__SAGA__STORE: `memory` or `sqlite`
//! - ATLAS__SAGA__SQLITE_PATH: Database file for the `sqlite` store
//! - ATLAS__MESSAGING__TYPE: `channel` or `kafka`

use std::sync::Arc;

use tracing::info;

use atlas_fabric::bus::{init_event_bus, HandlerRegistry};
use atlas_fabric::config::Config;
use atlas_fabric::envelope::Topics;
use atlas_fabric::jsonapi::JsonApiClient;
use atlas_fabric::saga::{consumer, HttpResolver, InMemorySagaStore, Orchestrator, SagaStore, SagaStoreType};
use atlas_fabric::utils::bootstrap::init_tracing;
use atlas_fabric::utils::shutdown::{self, trigger_on_ctrl_c};

const SERVICE_NAME: &str = "atlas-saga-orchestrator";

async fn open_store(config: &Config) -> Result<Arc<dyn SagaStore>, Box<dyn std::error::Error>> {
    match config.saga.store {
        SagaStoreType::Memory => {
            info!(store = "memory", "Using in-memory saga store");
            Ok(Arc::new(InMemorySagaStore::new()))
        }
        SagaStoreType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let path = config.saga.sqlite_path.as_str();
                let store = atlas_fabric::utils::bootstrap::connect_with_retry(
                    "sqlite",
                    path,
                    &config.services.retry,
                    || atlas_fabric::saga::SqliteSagaStore::open(path),
                )
                .await?;
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "sqlite"))]
            {
                Err("SQLite saga store requires the 'sqlite' feature. Rebuild with --features sqlite".into())
            }
        }
    }
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
    let store = open_store(&config).await?;
    let client = JsonApiClient::new(config.services.clone(), shutdown.clone())?;
    let resolver = Arc::new(HttpResolver::new(client));

    let orchestrator = Orchestrator::new(store, Arc::clone(&bus), resolver, topics, config.saga.clone());

    let mut registry = HandlerRegistry::new();
    consumer::register(&mut registry, &orchestrator);
    Arc::new(registry).attach(bus.as_ref()).await?;
    bus.start().await?;

    orchestrator.resume().await?;
    let retention = tokio::spawn(Arc::clone(&orchestrator).run_retention(shutdown.clone()));

    info!(service = SERVICE_NAME, "Service started");
    trigger_on_ctrl_c(trigger).await?;

    retention.await?;
    info!(service = SERVICE_NAME, "Service stopped");
    Ok(())
}
