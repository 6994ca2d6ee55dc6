use chrono::Duration as Span;

use super::*;
use crate::bus::MockEventBus;
use crate::envelope::ErrorCode;
use crate::saga::Action;
use crate::transport::InstanceRouteConfig;

const START_MAP: u32 = 103000100;
const BOARDING_MAP: u32 = 103000301;
const OBSERVATION_MAP: u32 = 103000302;
const DESTINATION_MAP: u32 = 103040000;

struct Fixture {
    manager: InstanceManager,
    bus: Arc<MockEventBus>,
    tenant: Tenant,
    route: InstanceRoute,
}

async fn fixture(capacity: u32) -> Fixture {
    let bus = Arc::new(MockEventBus::new());
    let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
    let route = InstanceRoute::from_config(
        &tenant,
        &InstanceRouteConfig {
            name: "kerning-square".to_string(),
            start_map_id: START_MAP,
            transit_map_ids: vec![BOARDING_MAP, OBSERVATION_MAP],
            destination_map_id: DESTINATION_MAP,
            capacity,
            boarding_window_secs: 10,
            travel_secs: 60,
            ..InstanceRouteConfig::default()
        },
    )
    .unwrap();
    let manager = InstanceManager::new(bus.clone(), Topics::default(), Duration::from_secs(30));
    manager.add_tenant(tenant.clone(), vec![route.clone()]).await;
    Fixture {
        manager,
        bus,
        tenant,
        route,
    }
}

fn request(character_id: u32, route: &InstanceRoute) -> StartTransport {
    StartTransport {
        character_id,
        world_id: 0,
        channel_id: 1,
        route_id: Some(route.id),
        route_name: None,
    }
}

async fn events(bus: &MockEventBus, message_type: &str) -> Vec<InstanceEvent> {
    bus.published_on("event.instance.transport")
        .await
        .into_iter()
        .filter(|e| e.is(message_type))
        .map(|e| e.decode().unwrap())
        .collect()
}

/// Warps submitted as sagas, in order.
async fn warps(bus: &MockEventBus) -> Vec<(Uuid, Warp)> {
    bus.published_on("command.saga")
        .await
        .into_iter()
        .map(|e| e.decode::<Saga>().unwrap())
        .filter(|s| s.saga_type == saga_types::TRANSPORT_WARP)
        .map(|s| match s.steps[0].parsed().unwrap() {
            Action::Warp(w) => (s.transaction_id, w),
            other => panic!("unexpected action {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn test_capacity_full_on_third_passenger() {
    let f = fixture(2).await;

    let first = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    let second = f.manager.start(&f.tenant, &request(2, &f.route), None).await.unwrap();
    let third = f.manager.start(&f.tenant, &request(3, &f.route), None).await;

    assert_eq!(first.instance_id, second.instance_id);
    assert!(matches!(third, Err(TransportError::CapacityFull(id)) if id == f.route.id));
    assert_eq!(events(&f.bus, ACCEPTED).await.len(), 2);
    assert_eq!(events(&f.bus, STARTED).await.len(), 1);
    assert_eq!(f.manager.enrollment(&f.tenant, 3).await.unwrap(), None);
}

#[tokio::test]
async fn test_boarding_warp_targets_instanced_first_transit_map() {
    let f = fixture(4).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();

    let warps = warps(&f.bus).await;
    assert_eq!(warps.len(), 1);
    assert_eq!(warps[0].1.map_id, BOARDING_MAP);
    assert_eq!(warps[0].1.instance, Some(instance.instance_id));
}

#[tokio::test]
async fn test_already_in_transit() {
    let f = fixture(4).await;
    f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();

    let again = f.manager.start(&f.tenant, &request(1, &f.route), None).await;

    assert!(matches!(again, Err(TransportError::AlreadyInTransit(1))));
}

#[tokio::test]
async fn test_unknown_route() {
    let f = fixture(4).await;
    let mut req = request(1, &f.route);
    req.route_id = None;
    req.route_name = Some("nowhere".to_string());

    let result = f.manager.start(&f.tenant, &req, None).await;

    assert!(matches!(result, Err(TransportError::RouteNotFound(_))));
}

#[tokio::test]
async fn test_start_by_route_name() {
    let f = fixture(4).await;
    let mut req = request(1, &f.route);
    req.route_id = None;
    req.route_name = Some("kerning-square".to_string());

    let instance = f.manager.start(&f.tenant, &req, None).await.unwrap();

    assert_eq!(instance.route_id, f.route.id);
}

#[tokio::test]
async fn test_reject_direct_request_sends_notice() {
    let f = fixture(1).await;
    f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.bus.take_published().await;

    let req = request(2, &f.route);
    let err = f.manager.start(&f.tenant, &req, None).await.unwrap_err();
    f.manager.reject(&f.tenant, &req, None, &err).await.unwrap();

    let errors = events(&f.bus, ERROR).await;
    assert_eq!(errors[0].error_code, Some(ErrorCode::TransportCapacityFull));
    let sagas = f.bus.published_on("command.saga").await;
    assert_eq!(sagas.len(), 1);
    let notice: Saga = sagas[0].decode().unwrap();
    assert_eq!(notice.saga_type, saga_types::TRANSPORT_NOTICE);
}

#[tokio::test]
async fn test_reject_saga_request_leaves_notice_to_orchestrator() {
    let f = fixture(1).await;
    let req = request(2, &f.route);
    let txn = Uuid::new_v4();

    f.manager
        .reject(&f.tenant, &req, Some(txn), &TransportError::AlreadyInTransit(2))
        .await
        .unwrap();

    let published = f.bus.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].transaction_id, Some(txn));
    assert_eq!(published[0].key, 2);
}

#[tokio::test]
async fn test_departure_then_arrival() {
    let f = fixture(4).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.bus.take_published().await;

    f.manager.tick(instance.boarding_until).await.unwrap();
    let departed = f.manager.instance(&f.tenant, instance.instance_id).await.unwrap().unwrap();
    assert_eq!(departed.state, InstanceState::InTransit);
    assert_eq!(warps(&f.bus).await[0].1.map_id, OBSERVATION_MAP);
    f.bus.take_published().await;

    f.manager.tick(instance.arrival_at).await.unwrap();

    assert_eq!(warps(&f.bus).await[0].1.map_id, DESTINATION_MAP);
    assert_eq!(events(&f.bus, COMPLETED).await.len(), 1);
    assert!(f.manager.instance(&f.tenant, instance.instance_id).await.unwrap().is_none());
    assert_eq!(f.manager.enrollment(&f.tenant, 1).await.unwrap(), None);
}

#[tokio::test]
async fn test_closed_boarding_opens_a_new_instance() {
    let f = fixture(4).await;
    let first = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.manager.tick(first.boarding_until).await.unwrap();

    let second = f.manager.start(&f.tenant, &request(2, &f.route), None).await.unwrap();

    assert_ne!(first.instance_id, second.instance_id);
}

#[tokio::test]
async fn test_missed_arrival_is_stuck() {
    let f = fixture(4).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.bus.take_published().await;

    f.manager
        .tick(instance.arrival_at + Span::seconds(31))
        .await
        .unwrap();

    let cancelled = events(&f.bus, CANCELLED).await;
    assert_eq!(cancelled[0].reason, Some(CancelReason::Stuck));
    let last = warps(&f.bus).await.pop().unwrap().1;
    assert_eq!(last.map_id, START_MAP);
    assert_eq!(last.instance, None);
    assert!(events(&f.bus, COMPLETED).await.is_empty());
}

#[tokio::test]
async fn test_logout_cancels_and_releases_empty_instance() {
    let f = fixture(4).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();

    assert!(f.manager.on_logout(&f.tenant, 1).await.unwrap());
    assert!(!f.manager.on_logout(&f.tenant, 1).await.unwrap());

    assert_eq!(events(&f.bus, CANCELLED).await[0].reason, Some(CancelReason::Logout));
    assert!(f.manager.instance(&f.tenant, instance.instance_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_leaving_transit_maps_cancels() {
    let f = fixture(4).await;
    f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.manager.start(&f.tenant, &request(2, &f.route), None).await.unwrap();

    let on_board = Location::new(0, 1, BOARDING_MAP);
    assert!(!f.manager.on_map_changed(&f.tenant, 1, &on_board).await.unwrap());

    let elsewhere = Location::new(0, 1, 100000000);
    assert!(f.manager.on_map_changed(&f.tenant, 1, &elsewhere).await.unwrap());

    assert_eq!(events(&f.bus, CANCELLED).await[0].reason, Some(CancelReason::MapExit));
    let remaining = f.manager.enrollment(&f.tenant, 2).await.unwrap().unwrap();
    let instance = f.manager.instance(&f.tenant, remaining).await.unwrap().unwrap();
    assert_eq!(instance.passengers.len(), 1);
}

#[tokio::test]
async fn test_login_on_transit_map_returns_to_start() {
    let f = fixture(4).await;

    let stranded = f
        .manager
        .on_login(&f.tenant, 9, &Location::new(0, 1, OBSERVATION_MAP))
        .await
        .unwrap();
    let elsewhere = f
        .manager
        .on_login(&f.tenant, 10, &Location::new(0, 1, DESTINATION_MAP))
        .await
        .unwrap();

    assert!(stranded);
    assert!(!elsewhere);
    let warps = warps(&f.bus).await;
    assert_eq!(warps.len(), 1);
    assert_eq!((warps[0].1.character_id, warps[0].1.map_id), (9, START_MAP));
}

#[tokio::test]
async fn test_failed_boarding_warp_rolls_back() {
    let f = fixture(4).await;
    f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    let (txn, _) = warps(&f.bus).await[0].clone();

    assert!(f.manager.on_warp_settled(&f.tenant, txn, true).await.unwrap());
    assert!(!f.manager.on_warp_settled(&f.tenant, txn, true).await.unwrap());

    assert_eq!(events(&f.bus, CANCELLED).await[0].reason, Some(CancelReason::WarpFailed));
    assert_eq!(f.manager.enrollment(&f.tenant, 1).await.unwrap(), None);
}

#[tokio::test]
async fn test_completed_boarding_warp_keeps_enrollment() {
    let f = fixture(4).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    let (txn, _) = warps(&f.bus).await[0].clone();

    assert!(f.manager.on_warp_settled(&f.tenant, txn, false).await.unwrap());

    assert_eq!(
        f.manager.enrollment(&f.tenant, 1).await.unwrap(),
        Some(instance.instance_id)
    );
}

#[tokio::test]
async fn test_shutdown_returns_everyone_to_start() {
    let f = fixture(4).await;
    f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.manager.start(&f.tenant, &request(2, &f.route), None).await.unwrap();
    f.bus.take_published().await;

    assert_eq!(f.manager.shutdown().await.unwrap(), 2);

    let cancelled = events(&f.bus, CANCELLED).await;
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.iter().all(|c| c.reason == Some(CancelReason::Shutdown)));
    assert!(warps(&f.bus).await.iter().all(|(_, w)| w.map_id == START_MAP));
    assert_eq!(f.manager.enrollment(&f.tenant, 1).await.unwrap(), None);
}

#[tokio::test]
async fn test_unannounced_start_rolls_back_and_retry_succeeds() {
    let f = fixture(4).await;
    f.bus.set_fail_on_publish(true).await;

    let refused = f.manager.start(&f.tenant, &request(1, &f.route), None).await;
    assert!(matches!(refused, Err(TransportError::Bus(_))));
    assert_eq!(f.manager.enrollment(&f.tenant, 1).await.unwrap(), None);

    f.bus.set_fail_on_publish(false).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();

    assert_eq!(instance.passengers.len(), 1);
    assert_eq!(f.manager.enrollment(&f.tenant, 1).await.unwrap(), Some(instance.instance_id));
    assert_eq!(events(&f.bus, STARTED).await.len(), 1);
    assert_eq!(warps(&f.bus).await.len(), 1);
}

#[tokio::test]
async fn test_unannounced_join_leaves_other_passengers_aboard() {
    let f = fixture(4).await;
    let first = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.bus.fail_next(1).await;

    assert!(f.manager.start(&f.tenant, &request(2, &f.route), None).await.is_err());

    let instance = f.manager.instance(&f.tenant, first.instance_id).await.unwrap().unwrap();
    assert_eq!(instance.passengers.len(), 1);
    assert_eq!(instance.passengers[0].character_id, 1);
    assert_eq!(f.manager.enrollment(&f.tenant, 2).await.unwrap(), None);
    assert!(f.manager.start(&f.tenant, &request(2, &f.route), None).await.is_ok());
}

#[tokio::test]
async fn test_departure_warp_failure_does_not_rewarp_others() {
    let f = fixture(4).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.manager.start(&f.tenant, &request(2, &f.route), None).await.unwrap();
    f.bus.take_published().await;
    f.bus.fail_next(1).await;

    f.manager.tick(instance.boarding_until).await.unwrap();

    let departed = warps(&f.bus).await;
    assert_eq!(departed.len(), 1);
    assert_eq!((departed[0].1.character_id, departed[0].1.map_id), (2, OBSERVATION_MAP));
    let stored = f.manager.instance(&f.tenant, instance.instance_id).await.unwrap().unwrap();
    assert_eq!(stored.state, InstanceState::InTransit);
    f.bus.take_published().await;

    f.manager.tick(instance.boarding_until + Span::seconds(1)).await.unwrap();
    assert!(warps(&f.bus).await.is_empty());
}

#[tokio::test]
async fn test_arrival_completes_passengers_whose_warp_left() {
    let f = fixture(4).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.manager.start(&f.tenant, &request(2, &f.route), None).await.unwrap();
    f.manager.tick(instance.boarding_until).await.unwrap();
    f.bus.take_published().await;
    f.bus.fail_next(1).await;

    f.manager.tick(instance.arrival_at).await.unwrap();

    let completed = events(&f.bus, COMPLETED).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].character_id, 2);
    assert!(f.manager.instance(&f.tenant, instance.instance_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_transit_entered_counts_down_to_arrival() {
    let f = fixture(4).await;
    let instance = f.manager.start(&f.tenant, &request(1, &f.route), None).await.unwrap();
    f.bus.take_published().await;

    let observed = instance.arrival_at - Span::seconds(25);
    let entered = f
        .manager
        .on_map_entered(&f.tenant, 1, &Location::new(0, 1, OBSERVATION_MAP), observed)
        .await
        .unwrap();
    let overdue = f
        .manager
        .on_map_entered(&f.tenant, 1, &Location::new(0, 1, BOARDING_MAP), instance.arrival_at + Span::seconds(5))
        .await
        .unwrap();
    let outside = f
        .manager
        .on_map_entered(&f.tenant, 1, &Location::new(0, 1, DESTINATION_MAP), observed)
        .await
        .unwrap();

    assert!(entered && overdue && !outside);
    let bodies: Vec<TransitEntered> = f
        .bus
        .published_on("event.instance.transport")
        .await
        .into_iter()
        .filter(|e| e.is(TRANSIT_ENTERED))
        .map(|e| e.decode().unwrap())
        .collect();
    assert_eq!(bodies.len(), 2);
    assert_eq!((bodies[0].map_id, bodies[0].remaining_secs), (OBSERVATION_MAP, 25));
    assert_eq!(bodies[1].remaining_secs, 0);
}
