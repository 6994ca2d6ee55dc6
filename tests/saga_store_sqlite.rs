//! SQLite saga store: durability across reopen and orchestrator resume.
//!
//! Run with: cargo test --test saga_store_sqlite --features sqlite

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use atlas_fabric::bus::MockEventBus;
use atlas_fabric::envelope::{Topic, Topics};
use atlas_fabric::saga::actions::{AwardItem, AwardMesos};
use atlas_fabric::saga::{
    saga_types, Orchestrator, Saga, SagaConfig, SagaState, SagaStore, SqliteSagaStore, StaticResolver,
};
use atlas_fabric::tenant::Tenant;

fn tenant() -> Tenant {
    Tenant::new(Uuid::new_v4(), "GMS", 83, 1)
}

fn reward() -> Saga {
    Saga::new(Uuid::new_v4(), saga_types::QUEST_REWARD, "npc:9010000")
        .step("mesos", AwardMesos::new(42, 500))
        .step("item", AwardItem::new(42, 2000001, 1))
}

#[tokio::test]
async fn test_sagas_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sagas.db");
    let path = path.to_str().unwrap();
    let t = tenant();
    let saga = reward();

    {
        let store = SqliteSagaStore::open(path).await.unwrap();
        assert!(store.insert(&t, &saga).await.unwrap());
        assert!(!store.insert(&t, &saga).await.unwrap());
    }

    let store = SqliteSagaStore::open(path).await.unwrap();
    let loaded = store.get(&t, saga.transaction_id).await.unwrap().unwrap();
    assert_eq!(loaded.transaction_id, saga.transaction_id);
    assert_eq!(loaded.steps.len(), 2);
    assert!(store.get(&tenant(), saga.transaction_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_purge_keeps_active_and_recent() {
    let store = SqliteSagaStore::in_memory().await.unwrap();
    let t = tenant();

    let active = reward();
    let mut done = reward();
    done.state = SagaState::Completed;
    store.insert(&t, &active).await.unwrap();
    store.insert(&t, &done).await.unwrap();

    assert_eq!(store.purge_terminal(Utc::now() - Duration::hours(1)).await.unwrap(), 0);
    assert_eq!(store.purge_terminal(Utc::now() + Duration::seconds(1)).await.unwrap(), 1);

    let left = store.list(&t).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].transaction_id, active.transaction_id);
    assert_eq!(store.active().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_restarted_orchestrator_reissues_in_flight_step() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sagas.db");
    let path = path.to_str().unwrap();
    let t = tenant();
    let saga = reward();
    let txn = saga.transaction_id;

    let first_bus = Arc::new(MockEventBus::new());
    {
        let store = Arc::new(SqliteSagaStore::open(path).await.unwrap());
        let orchestrator = Orchestrator::new(
            store,
            first_bus.clone(),
            Arc::new(StaticResolver::new()),
            Topics::default(),
            SagaConfig::default(),
        );
        orchestrator.submit(&t, saga).await.unwrap();
    }
    assert_eq!(first_bus.published_count().await, 1);

    let bus = Arc::new(MockEventBus::new());
    let store = Arc::new(SqliteSagaStore::open(path).await.unwrap());
    let orchestrator = Orchestrator::new(
        store,
        bus.clone(),
        Arc::new(StaticResolver::new()),
        Topics::default(),
        SagaConfig::default(),
    );
    assert_eq!(orchestrator.resume().await.unwrap(), 1);

    let reissued = bus.published_on(Topics::default().name(Topic::CommandCharacterStat)).await;
    assert_eq!(reissued.len(), 1);
    assert_eq!(reissued[0].transaction_id, Some(txn));
    let state = orchestrator.query(&t, txn).await.unwrap().unwrap();
    assert_eq!(state.state, SagaState::InFlight(0));
}
