//! Scheduled route driver.
//!
//! Each tick covers the wall-clock interval since the previous tick and acts
//! on every route boundary inside it. Nothing is journaled: after a restart
//! the first tick starts from the current instant, and the phase function
//! tells where every route stands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{RouteStatus, ARRIVED, DEPARTED};
use super::presence::{Location, Presence};
use super::route::{Boundary, Phase, Route};
use super::Result;
use crate::bus::EventBus;
use crate::envelope::{self, Envelope, Topic, Topics};
use crate::saga::actions::{Action, Dispatch, Warp};
use crate::tenant::{self, Tenant};
use crate::utils::shutdown::Shutdown;

/// Drives every scheduled route of every tenant.
pub struct RouteScheduler {
    bus: Arc<dyn EventBus>,
    topics: Topics,
    presence: Presence,
    routes: RwLock<HashMap<Tenant, Vec<Route>>>,
}

impl RouteScheduler {
    pub fn new(bus: Arc<dyn EventBus>, topics: Topics, presence: Presence) -> Self {
        Self {
            bus,
            topics,
            presence,
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Install the routes of one tenant, replacing any previous set.
    pub async fn add_tenant(&self, tenant: Tenant, routes: Vec<Route>) {
        info!(tenant_id = %tenant.id, count = routes.len(), "Loaded scheduled routes");
        self.routes.write().await.insert(tenant, routes);
    }

    pub async fn routes(&self, tenant: &Tenant) -> Vec<Route> {
        self.routes.read().await.get(tenant).cloned().unwrap_or_default()
    }

    /// Phase of one route at `t`.
    pub async fn phase(&self, tenant: &Tenant, route_id: Uuid, t: DateTime<Utc>) -> Option<Phase> {
        self.routes
            .read()
            .await
            .get(tenant)
            .and_then(|routes| routes.iter().find(|r| r.id == route_id))
            .map(|r| r.phase_at(t))
    }

    /// Act on every boundary in `(from, to]`. Returns the number of warps issued.
    pub async fn advance(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
        let snapshot: Vec<(Tenant, Vec<Route>)> = self
            .routes
            .read()
            .await
            .iter()
            .map(|(t, r)| (t.clone(), r.clone()))
            .collect();

        let mut warps = 0;
        for (t, routes) in snapshot {
            for route in &routes {
                for (at, boundary) in route.boundaries_between(from, to) {
                    let acted = tenant::scope(t.clone(), self.act(&t, route, boundary, at)).await;
                    match acted {
                        Ok(n) => warps += n,
                        Err(e) => warn!(
                            tenant_id = %t.id,
                            route = %route.name,
                            boundary = ?boundary,
                            error = %e,
                            "Route boundary failed"
                        ),
                    }
                }
            }
        }
        warps
    }

    async fn act(&self, tenant: &Tenant, route: &Route, boundary: Boundary, at: DateTime<Utc>) -> Result<usize> {
        match boundary {
            Boundary::BoardingOpens => {
                debug!(tenant_id = %tenant.id, route = %route.name, at = %at, "Boarding open");
                Ok(0)
            }
            Boundary::BoardingCloses => Ok(self
                .herd(tenant, route, &[route.start_map_id], route.staging_map_id)
                .await),
            Boundary::Departs => {
                let n = self
                    .herd(tenant, route, &[route.staging_map_id], route.observation_map_id)
                    .await;
                self.publish_status(tenant, route, DEPARTED, route.start_map_id).await?;
                Ok(n)
            }
            Boundary::Arrives => {
                let n = self
                    .herd(tenant, route, &route.arrival_sources(), route.destination_map_id)
                    .await;
                self.publish_status(tenant, route, ARRIVED, route.destination_map_id)
                    .await?;
                Ok(n)
            }
        }
    }

    /// Warp everyone on `sources` to `target`. Returns the warps issued.
    ///
    /// A rider whose warp cannot be published keeps their location and is
    /// picked up by the next sweep of that map.
    async fn herd(&self, tenant: &Tenant, route: &Route, sources: &[u32], target: u32) -> usize {
        let riders = match self.presence.on_maps(tenant, sources).await {
            Ok(riders) => riders,
            Err(e) => {
                warn!(tenant_id = %tenant.id, route = %route.name, error = %e, "Failed to read presence");
                return 0;
            }
        };

        let mut warped = 0;
        for (character_id, from) in &riders {
            let warp = Warp {
                character_id: *character_id,
                world_id: from.world_id,
                channel_id: from.channel_id,
                map_id: target,
                portal_id: None,
                instance: None,
            };
            if let Err(e) = self.publish_warp(tenant, warp).await {
                warn!(
                    tenant_id = %tenant.id,
                    route = %route.name,
                    character_id,
                    map_id = target,
                    error = %e,
                    "Failed to warp rider"
                );
                continue;
            }
            warped += 1;
            let arrived = Location::new(from.world_id, from.channel_id, target);
            if let Err(e) = self.presence.enter(tenant, *character_id, arrived).await {
                warn!(tenant_id = %tenant.id, character_id, error = %e, "Failed to record rider location");
            }
        }
        if warped > 0 {
            info!(
                tenant_id = %tenant.id,
                route = %route.name,
                count = warped,
                skipped = riders.len() - warped,
                map_id = target,
                "Warped riders"
            );
        }
        warped
    }

    async fn publish_warp(&self, tenant: &Tenant, warp: Warp) -> Result<()> {
        let Dispatch::Await { command, .. } = Action::from(warp).dispatch() else {
            return Ok(());
        };
        let envelope = Envelope::new(
            self.topics.name(command.topic),
            command.key,
            tenant.clone(),
            command.message_type,
            &command.body,
        )?;
        self.bus.publish(Arc::new(envelope)).await?;
        Ok(())
    }

    async fn publish_status(&self, tenant: &Tenant, route: &Route, status: &str, map_id: u32) -> Result<()> {
        let body = RouteStatus {
            route_id: route.id,
            route_name: route.name.clone(),
            map_id,
        };
        let envelope = Envelope::new(
            self.topics.name(Topic::EventTransportStatus),
            envelope::name_key(tenant, &route.name),
            tenant.clone(),
            status,
            &body,
        )?;
        self.bus.publish(Arc::new(envelope)).await?;
        Ok(())
    }

    /// Report boundaries of the current cycles that passed before `now`.
    /// They are not replayed; riders caught mid-cycle are swept at the next
    /// boundary of their map.
    async fn log_missed(&self, now: DateTime<Utc>) -> usize {
        let mut total = 0;
        for (t, routes) in self.routes.read().await.iter() {
            for route in routes {
                let since = route.cycle_start(now);
                let missed: Vec<Boundary> = route
                    .boundaries_between(since, now)
                    .into_iter()
                    .map(|(_, b)| b)
                    .collect();
                if !missed.is_empty() {
                    debug!(
                        tenant_id = %t.id,
                        route = %route.name,
                        from = %since,
                        to = %now,
                        missed = ?missed,
                        "Skipping boundaries passed before start"
                    );
                }
                total += missed.len();
            }
        }
        total
    }

    /// Tick until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown, tick: Duration) {
        info!(tick = ?tick, "Starting route scheduler");
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Utc::now();
        self.log_missed(last).await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("Route scheduler stopped");
                    return;
                }
            }
            let now = Utc::now();
            let warps = self.advance(last, now).await;
            if warps > 0 {
                debug!(count = warps, "Scheduler tick");
            }
            last = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as Span;

    use super::*;
    use crate::bus::MockEventBus;
    use crate::transport::RouteConfig;

    const START: u32 = 101000300;
    const STAGING: u32 = 101000301;
    const OBSERVATION: u32 = 200090000;
    const DESTINATION: u32 = 200000100;

    fn config() -> RouteConfig {
        RouteConfig {
            id: None,
            name: "ellinia-orbis".to_string(),
            start_map_id: START,
            staging_map_id: STAGING,
            en_route_map_ids: vec![200090010],
            destination_map_id: DESTINATION,
            observation_map_id: OBSERVATION,
            boarding_window_secs: 300,
            pre_departure_secs: 60,
            travel_secs: 600,
            cycle_interval_secs: 1800,
            cycle_anchor: None,
        }
    }

    async fn scheduler() -> (RouteScheduler, Arc<MockEventBus>, Presence, Tenant, DateTime<Utc>) {
        let bus = Arc::new(MockEventBus::new());
        let presence = Presence::in_memory();
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        let route = Route::from_config(&tenant, &config()).unwrap();
        let t0 = route.cycle_start(Utc::now());
        let scheduler = RouteScheduler::new(bus.clone(), Topics::default(), presence.clone());
        scheduler.add_tenant(tenant.clone(), vec![route]).await;
        (scheduler, bus, presence, tenant, t0)
    }

    async fn warp_targets(bus: &MockEventBus) -> Vec<(u32, u32)> {
        bus.take_published()
            .await
            .into_iter()
            .filter(|e| e.is("CHANGE_MAP"))
            .map(|e| (e.key, e.body["mapId"].as_u64().unwrap() as u32))
            .collect()
    }

    #[tokio::test]
    async fn test_boarding_close_warps_start_to_staging() {
        let (scheduler, bus, presence, tenant, t0) = scheduler().await;
        presence.enter(&tenant, 1, Location::new(0, 1, START)).await.unwrap();

        let warps = scheduler.advance(t0 + Span::minutes(4), t0 + Span::minutes(5)).await;

        assert_eq!(warps, 1);
        assert_eq!(warp_targets(&bus).await, vec![(1, STAGING)]);
        assert_eq!(presence.location(&tenant, 1).await.unwrap().unwrap().map_id, STAGING);
    }

    #[tokio::test]
    async fn test_departure_emits_status() {
        let (scheduler, bus, presence, tenant, t0) = scheduler().await;
        presence.enter(&tenant, 1, Location::new(0, 1, STAGING)).await.unwrap();

        scheduler.advance(t0 + Span::minutes(5), t0 + Span::minutes(6)).await;

        let status = bus.published_on("event.transport.status").await;
        assert_eq!(status.len(), 1);
        assert!(status[0].is(DEPARTED));
        assert_eq!(status[0].key, envelope::name_key(&tenant, "ellinia-orbis"));
        assert_eq!(warp_targets(&bus).await, vec![(1, OBSERVATION)]);
    }

    #[tokio::test]
    async fn test_arrival_empties_observation_and_en_route() {
        let (scheduler, bus, presence, tenant, t0) = scheduler().await;
        presence.enter(&tenant, 1, Location::new(0, 1, OBSERVATION)).await.unwrap();
        presence.enter(&tenant, 2, Location::new(0, 1, 200090010)).await.unwrap();

        scheduler.advance(t0 + Span::minutes(15), t0 + Span::minutes(16)).await;

        assert_eq!(warp_targets(&bus).await, vec![(1, DESTINATION), (2, DESTINATION)]);
    }

    #[tokio::test]
    async fn test_quiet_interval_does_nothing() {
        let (scheduler, bus, presence, tenant, t0) = scheduler().await;
        presence.enter(&tenant, 1, Location::new(0, 1, START)).await.unwrap();

        let warps = scheduler.advance(t0 + Span::minutes(1), t0 + Span::minutes(4)).await;

        assert_eq!(warps, 0);
        assert_eq!(bus.published_count().await, 0);
    }

    #[tokio::test]
    async fn test_phase_lookup() {
        let (scheduler, _, _, tenant, t0) = scheduler().await;
        let id = scheduler.routes(&tenant).await[0].id;

        assert_eq!(
            scheduler.phase(&tenant, id, t0 + Span::minutes(7)).await,
            Some(Phase::Traveling)
        );
        assert_eq!(scheduler.phase(&tenant, Uuid::new_v4(), t0).await, None);
    }

    #[tokio::test]
    async fn test_one_failed_warp_does_not_strand_other_riders() {
        let (scheduler, bus, presence, tenant, t0) = scheduler().await;
        presence.enter(&tenant, 1, Location::new(0, 1, OBSERVATION)).await.unwrap();
        presence.enter(&tenant, 2, Location::new(0, 1, OBSERVATION)).await.unwrap();
        presence.enter(&tenant, 3, Location::new(0, 1, 200090010)).await.unwrap();
        bus.fail_next(1).await;

        let warps = scheduler.advance(t0 + Span::minutes(15), t0 + Span::minutes(16)).await;

        assert_eq!(warps, 2);
        let published = bus.take_published().await;
        assert!(published.iter().any(|e| e.is(ARRIVED)));
        let warped: Vec<u32> = published.iter().filter(|e| e.is("CHANGE_MAP")).map(|e| e.key).collect();
        assert_eq!(warped.len(), 2);

        let mut at_destination = 0;
        for character_id in 1..=3 {
            let map_id = presence.location(&tenant, character_id).await.unwrap().unwrap().map_id;
            if warped.contains(&character_id) {
                assert_eq!(map_id, DESTINATION);
                at_destination += 1;
            } else {
                assert_ne!(map_id, DESTINATION);
            }
        }
        assert_eq!(at_destination, 2);
    }

    #[tokio::test]
    async fn test_boundaries_before_start_are_not_replayed() {
        let (scheduler, bus, presence, tenant, t0) = scheduler().await;
        presence.enter(&tenant, 1, Location::new(0, 1, START)).await.unwrap();

        assert_eq!(scheduler.log_missed(t0).await, 0);
        assert_eq!(scheduler.log_missed(t0 + Span::minutes(7)).await, 2);

        assert_eq!(bus.published_count().await, 0);
        assert_eq!(presence.location(&tenant, 1).await.unwrap().unwrap().map_id, START);
    }

    #[tokio::test]
    async fn test_publish_failure_is_contained() {
        let (scheduler, bus, presence, tenant, t0) = scheduler().await;
        presence.enter(&tenant, 1, Location::new(0, 1, START)).await.unwrap();
        bus.set_fail_on_publish(true).await;

        let warps = scheduler.advance(t0 + Span::minutes(4), t0 + Span::minutes(5)).await;

        assert_eq!(warps, 0);
        assert_eq!(presence.location(&tenant, 1).await.unwrap().unwrap().map_id, START);
    }
}
