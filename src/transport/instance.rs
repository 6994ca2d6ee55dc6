//! Instance (on-demand) transports.
//!
//! An instance is a private copy of a route's transit maps carrying at most
//! `capacity` characters. The first `START` for a route opens an instance for
//! boarding; later starts join it until the boarding window closes. The
//! instance then travels and either arrives or, when its arrival goes
//! unprocessed past the grace period, is declared stuck.
//!
//! Every warp is submitted as a one-step saga so the orchestrator owns
//! delivery and timeouts. A failed boarding warp rolls the enrollment back.
//!
//! All mutations pass through one gate; registry entries are never written
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{
    CancelReason, InstanceEvent, TransitEntered, ACCEPTED, CANCELLED, COMPLETED, ERROR, STARTED,
    TRANSIT_ENTERED,
};
use super::presence::Location;
use super::route::InstanceRoute;
use super::{Result, TransportError};
use crate::bus::EventBus;
use crate::envelope::{Envelope, Topic, Topics};
use crate::registry::{InMemoryRegistry, TenantRegistry};
use crate::saga::actions::{StartTransport, Warp};
use crate::saga::messages::{message_saga, submit_envelope, transport_failure_text};
use crate::saga::{saga_types, Saga};
use crate::tenant::{self, Tenant};
use crate::utils::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Boarding,
    InTransit,
    Arrived,
    Stuck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passenger {
    pub character_id: u32,
    pub world_id: u8,
    pub channel_id: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInstance {
    pub instance_id: Uuid,
    pub route_id: Uuid,
    pub state: InstanceState,
    pub boarding_until: DateTime<Utc>,
    pub arrival_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub passengers: Vec<Passenger>,
}

impl TransportInstance {
    fn open(route: &InstanceRoute, now: DateTime<Utc>) -> Self {
        let boarding_until = now + route.boarding_window();
        Self {
            instance_id: Uuid::new_v4(),
            route_id: route.id,
            state: InstanceState::Boarding,
            boarding_until,
            arrival_at: boarding_until + route.travel(),
            created_at: now,
            passengers: Vec::new(),
        }
    }

    fn accepts_boarding(&self, now: DateTime<Utc>) -> bool {
        self.state == InstanceState::Boarding && now < self.boarding_until
    }
}

/// A boarding warp whose saga has not settled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWarp {
    pub character_id: u32,
    pub instance_id: Uuid,
}

/// Owns every instance transport of every tenant.
pub struct InstanceManager {
    bus: Arc<dyn EventBus>,
    topics: Topics,
    stuck_grace: chrono::Duration,
    routes: RwLock<HashMap<Tenant, Vec<InstanceRoute>>>,
    instances: Arc<dyn TenantRegistry<Uuid, TransportInstance>>,
    enrollments: Arc<dyn TenantRegistry<u32, Uuid>>,
    pending: Arc<dyn TenantRegistry<Uuid, PendingWarp>>,
    gate: Mutex<()>,
}

impl InstanceManager {
    pub fn new(bus: Arc<dyn EventBus>, topics: Topics, stuck_grace: Duration) -> Self {
        Self {
            bus,
            topics,
            stuck_grace: chrono::Duration::from_std(stuck_grace).unwrap_or_else(|_| chrono::Duration::days(1)),
            routes: RwLock::new(HashMap::new()),
            instances: Arc::new(InMemoryRegistry::new()),
            enrollments: Arc::new(InMemoryRegistry::new()),
            pending: Arc::new(InMemoryRegistry::new()),
            gate: Mutex::new(()),
        }
    }

    /// Keep instance state in shared registries instead of process memory.
    pub fn with_registries(
        mut self,
        instances: Arc<dyn TenantRegistry<Uuid, TransportInstance>>,
        enrollments: Arc<dyn TenantRegistry<u32, Uuid>>,
        pending: Arc<dyn TenantRegistry<Uuid, PendingWarp>>,
    ) -> Self {
        self.instances = instances;
        self.enrollments = enrollments;
        self.pending = pending;
        self
    }

    pub async fn add_tenant(&self, tenant: Tenant, routes: Vec<InstanceRoute>) {
        info!(tenant_id = %tenant.id, count = routes.len(), "Loaded instance routes");
        self.routes.write().await.insert(tenant, routes);
    }

    pub async fn instance(&self, tenant: &Tenant, instance_id: Uuid) -> Result<Option<TransportInstance>> {
        Ok(self.instances.get(tenant, &instance_id).await?)
    }

    /// Instance the character is enrolled in.
    pub async fn enrollment(&self, tenant: &Tenant, character_id: u32) -> Result<Option<Uuid>> {
        Ok(self.enrollments.get(tenant, &character_id).await?)
    }

    // ========================================================================
    // Boarding
    // ========================================================================

    /// Enroll the requesting character and warp them aboard.
    pub async fn start(
        &self,
        tenant: &Tenant,
        request: &StartTransport,
        transaction_id: Option<Uuid>,
    ) -> Result<TransportInstance> {
        let _gate = self.gate.lock().await;
        let route = self.resolve_route(tenant, request).await?;

        if self.enrollments.get(tenant, &request.character_id).await?.is_some() {
            return Err(TransportError::AlreadyInTransit(request.character_id));
        }

        let now = Utc::now();
        let (mut instance, created) = match self.open_instance(tenant, route.id, now).await? {
            Some(open) if open.passengers.len() >= route.capacity as usize => {
                return Err(TransportError::CapacityFull(route.id));
            }
            Some(open) => (open, false),
            None => (TransportInstance::open(&route, now), true),
        };

        let passenger = Passenger {
            character_id: request.character_id,
            world_id: request.world_id,
            channel_id: request.channel_id,
        };
        instance.passengers.push(passenger);
        self.enrollments
            .put(tenant, passenger.character_id, instance.instance_id)
            .await?;
        if let Err(e) = self
            .instances
            .put(tenant, instance.instance_id, instance.clone())
            .await
        {
            if let Err(e) = self.enrollments.remove(tenant, &passenger.character_id).await {
                warn!(character_id = passenger.character_id, error = %e, "Failed to roll back enrollment");
            }
            return Err(e.into());
        }

        info!(
            tenant_id = %tenant.id,
            character_id = passenger.character_id,
            route = %route.name,
            instance_id = %instance.instance_id,
            passengers = instance.passengers.len(),
            "Character boarded instance transport"
        );

        let warp_txn = Uuid::new_v4();
        if let Err(e) = self
            .board(tenant, &route, &instance, &passenger, created, transaction_id, warp_txn)
            .await
        {
            self.unboard(tenant, passenger.character_id, warp_txn).await;
            return Err(e);
        }
        Ok(instance)
    }

    #[allow(clippy::too_many_arguments)]
    async fn board(
        &self,
        tenant: &Tenant,
        route: &InstanceRoute,
        instance: &TransportInstance,
        passenger: &Passenger,
        created: bool,
        transaction_id: Option<Uuid>,
        warp_txn: Uuid,
    ) -> Result<()> {
        if created {
            self.publish_event(tenant, STARTED, event(passenger, instance, None), None)
                .await?;
        }
        self.publish_event(tenant, ACCEPTED, event(passenger, instance, None), transaction_id)
            .await?;

        self.pending
            .put(
                tenant,
                warp_txn,
                PendingWarp {
                    character_id: passenger.character_id,
                    instance_id: instance.instance_id,
                },
            )
            .await?;
        self.submit_warp(
            tenant,
            warp_txn,
            passenger,
            route.boarding_map_id(),
            Some(instance.instance_id),
        )
        .await
    }

    /// Undo an enrollment whose announcement or boarding warp never left.
    async fn unboard(&self, tenant: &Tenant, character_id: u32, warp_txn: Uuid) {
        if let Err(e) = self.pending.remove(tenant, &warp_txn).await {
            warn!(character_id, error = %e, "Failed to discard pending boarding warp");
        }
        match self.drop_passenger(tenant, character_id).await {
            Ok(_) => warn!(tenant_id = %tenant.id, character_id, "Boarding aborted, enrollment rolled back"),
            Err(e) => warn!(character_id, error = %e, "Failed to roll back enrollment"),
        }
    }

    /// Report a refused start to the requester.
    ///
    /// Starts issued by a saga learn of the failure through the `ERROR`
    /// status; the orchestrator notifies the character. Direct requests get
    /// the pink-text notice from here.
    pub async fn reject(
        &self,
        tenant: &Tenant,
        request: &StartTransport,
        transaction_id: Option<Uuid>,
        error: &TransportError,
    ) -> Result<()> {
        let code = error.error_code();
        warn!(
            tenant_id = %tenant.id,
            character_id = request.character_id,
            error_code = %code,
            error = %error,
            "Instance transport start refused"
        );

        let body = InstanceEvent {
            character_id: request.character_id,
            world_id: request.world_id,
            route_id: request.route_id.unwrap_or_default(),
            instance_id: None,
            reason: None,
            error_code: Some(code.clone()),
        };
        self.publish_event(tenant, ERROR, body, transaction_id).await?;

        if transaction_id.is_none() {
            let notice = message_saga(
                request.character_id,
                transport_failure_text(&code),
                "atlas-transports",
            );
            let envelope = submit_envelope(&self.topics, tenant, &notice)?;
            self.bus.publish(Arc::new(envelope)).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Advance every instance to `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let _gate = self.gate.lock().await;
        for t in self.instances.tenants().await? {
            for (_, instance) in self.instances.entries(&t).await? {
                let id = instance.instance_id;
                if let Err(e) = tenant::scope(t.clone(), self.progress(&t, instance, now)).await {
                    warn!(tenant_id = %t.id, instance_id = %id, error = %e, "Instance transport tick failed");
                }
            }
        }
        Ok(())
    }

    async fn progress(&self, tenant: &Tenant, mut instance: TransportInstance, now: DateTime<Utc>) -> Result<()> {
        let Some(route) = self.route(tenant, instance.route_id).await else {
            warn!(instance_id = %instance.instance_id, route_id = %instance.route_id, "Instance of unknown route released");
            return self.release(tenant, &instance).await;
        };

        if instance.state == InstanceState::Boarding && now >= instance.boarding_until {
            instance.state = InstanceState::InTransit;
            self.instances
                .put(tenant, instance.instance_id, instance.clone())
                .await?;
            info!(
                tenant_id = %tenant.id,
                route = %route.name,
                instance_id = %instance.instance_id,
                passengers = instance.passengers.len(),
                "Instance transport departed"
            );
            if route.observation_map_id() != route.boarding_map_id() {
                self.warp_all(tenant, &instance, route.observation_map_id(), Some(instance.instance_id))
                    .await;
            }
        }

        if instance.state != InstanceState::InTransit {
            return Ok(());
        }

        if now > instance.arrival_at + self.stuck_grace {
            instance.state = InstanceState::Stuck;
            warn!(
                tenant_id = %tenant.id,
                route = %route.name,
                instance_id = %instance.instance_id,
                arrival_at = %instance.arrival_at,
                "Instance transport stuck, returning passengers"
            );
            self.release(tenant, &instance).await?;
            self.warp_all(tenant, &instance, route.start_map_id, None).await;
            for p in &instance.passengers {
                if let Err(e) = self.cancel(tenant, &instance, p, CancelReason::Stuck).await {
                    warn!(character_id = p.character_id, error = %e, "Failed to announce cancellation");
                }
            }
            Ok(())
        } else if now >= instance.arrival_at {
            instance.state = InstanceState::Arrived;
            info!(
                tenant_id = %tenant.id,
                route = %route.name,
                instance_id = %instance.instance_id,
                "Instance transport arrived"
            );
            self.release(tenant, &instance).await?;
            for p in self.warp_all(tenant, &instance, route.destination_map_id, None).await {
                if let Err(e) = self
                    .publish_event(tenant, COMPLETED, event(&p, &instance, None), None)
                    .await
                {
                    warn!(character_id = p.character_id, error = %e, "Failed to announce completion");
                }
            }
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Warp every passenger; one failed submission does not hold back the
    /// rest. Returns the passengers whose warp was submitted.
    async fn warp_all(
        &self,
        tenant: &Tenant,
        instance: &TransportInstance,
        map_id: u32,
        target_instance: Option<Uuid>,
    ) -> Vec<Passenger> {
        let mut warped = Vec::with_capacity(instance.passengers.len());
        for p in &instance.passengers {
            match self
                .submit_warp(tenant, Uuid::new_v4(), p, map_id, target_instance)
                .await
            {
                Ok(()) => warped.push(*p),
                Err(e) => warn!(
                    tenant_id = %tenant.id,
                    character_id = p.character_id,
                    instance_id = %instance.instance_id,
                    map_id,
                    error = %e,
                    "Failed to warp passenger"
                ),
            }
        }
        warped
    }

    /// The character logged out.
    pub async fn on_logout(&self, tenant: &Tenant, character_id: u32) -> Result<bool> {
        let _gate = self.gate.lock().await;
        match self.drop_passenger(tenant, character_id).await? {
            Some((instance, passenger)) => {
                self.cancel(tenant, &instance, &passenger, CancelReason::Logout)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The character changed map. Leaving the transit maps ends the trip.
    pub async fn on_map_changed(&self, tenant: &Tenant, character_id: u32, location: &Location) -> Result<bool> {
        let _gate = self.gate.lock().await;
        let Some(instance_id) = self.enrollments.get(tenant, &character_id).await? else {
            return Ok(false);
        };
        let on_route = match self.instances.get(tenant, &instance_id).await? {
            Some(instance) => self
                .route(tenant, instance.route_id)
                .await
                .is_some_and(|r| r.is_transit_map(location.map_id)),
            None => false,
        };
        if on_route {
            return Ok(false);
        }

        match self.drop_passenger(tenant, character_id).await? {
            Some((instance, passenger)) => {
                debug!(character_id, map_id = location.map_id, "Passenger left the transit maps");
                self.cancel(tenant, &instance, &passenger, CancelReason::MapExit)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// A passenger entered a map. Entering one of the trip's transit maps
    /// tells them how long the ride has left.
    pub async fn on_map_entered(
        &self,
        tenant: &Tenant,
        character_id: u32,
        location: &Location,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let _gate = self.gate.lock().await;
        let Some(instance_id) = self.enrollments.get(tenant, &character_id).await? else {
            return Ok(false);
        };
        let Some(instance) = self.instances.get(tenant, &instance_id).await? else {
            return Ok(false);
        };
        let Some(route) = self.route(tenant, instance.route_id).await else {
            return Ok(false);
        };
        if !route.is_transit_map(location.map_id) {
            warn!(character_id, map_id = location.map_id, route = %route.name, "Entered map outside the trip's route");
            return Ok(false);
        }

        let remaining_secs = u32::try_from((instance.arrival_at - now).num_seconds().max(0)).unwrap_or(u32::MAX);
        debug!(
            character_id,
            map_id = location.map_id,
            route = %route.name,
            remaining_secs,
            "Passenger entered transit map"
        );
        let body = TransitEntered {
            character_id,
            world_id: location.world_id,
            channel_id: location.channel_id,
            route_id: route.id,
            instance_id,
            map_id: location.map_id,
            remaining_secs,
        };
        self.publish(tenant, TRANSIT_ENTERED, character_id, &body, None).await?;
        Ok(true)
    }

    /// A character logging in on a transit map without a trip is sent back
    /// to the route start.
    pub async fn on_login(&self, tenant: &Tenant, character_id: u32, location: &Location) -> Result<bool> {
        let _gate = self.gate.lock().await;
        if self.enrollments.get(tenant, &character_id).await?.is_some() {
            return Ok(false);
        }
        let start = self
            .routes
            .read()
            .await
            .get(tenant)
            .and_then(|routes| routes.iter().find(|r| r.is_transit_map(location.map_id)))
            .map(|r| r.start_map_id);
        let Some(start) = start else {
            return Ok(false);
        };

        info!(character_id, map_id = location.map_id, "Stranded on transit map, returning to start");
        let passenger = Passenger {
            character_id,
            world_id: location.world_id,
            channel_id: location.channel_id,
        };
        self.submit_warp(tenant, Uuid::new_v4(), &passenger, start, None)
            .await?;
        Ok(true)
    }

    /// Settle a warp saga. A failed boarding warp cancels the enrollment.
    pub async fn on_warp_settled(&self, tenant: &Tenant, transaction_id: Uuid, failed: bool) -> Result<bool> {
        let _gate = self.gate.lock().await;
        let Some(pending) = self.pending.remove(tenant, &transaction_id).await? else {
            return Ok(false);
        };
        if !failed {
            return Ok(true);
        }

        let still_aboard = self.enrollments.get(tenant, &pending.character_id).await? == Some(pending.instance_id);
        if still_aboard {
            if let Some((instance, passenger)) = self.drop_passenger(tenant, pending.character_id).await? {
                warn!(
                    character_id = pending.character_id,
                    instance_id = %pending.instance_id,
                    "Boarding warp failed, enrollment rolled back"
                );
                self.cancel(tenant, &instance, &passenger, CancelReason::WarpFailed)
                    .await?;
            }
        }
        Ok(true)
    }

    /// Return every passenger to their route start. Returns how many.
    pub async fn shutdown(&self) -> Result<usize> {
        let _gate = self.gate.lock().await;
        let mut returned = 0;
        for t in self.instances.tenants().await? {
            for (_, instance) in self.instances.entries(&t).await? {
                if let Some(route) = self.route(&t, instance.route_id).await {
                    for p in &instance.passengers {
                        self.submit_warp(&t, Uuid::new_v4(), p, route.start_map_id, None)
                            .await?;
                        self.cancel(&t, &instance, p, CancelReason::Shutdown).await?;
                        returned += 1;
                    }
                }
                self.release(&t, &instance).await?;
            }
        }
        info!(count = returned, "Instance transports shut down");
        Ok(returned)
    }

    /// Tick until shutdown, then return everyone aboard to safety.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown, tick: Duration) {
        info!(tick = ?tick, "Starting instance transport manager");
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => {
                    if let Err(e) = self.shutdown().await {
                        warn!(error = %e, "Instance transport shutdown incomplete");
                    }
                    return;
                }
            }
            if let Err(e) = self.tick(Utc::now()).await {
                warn!(error = %e, "Instance transport tick failed");
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn resolve_route(&self, tenant: &Tenant, request: &StartTransport) -> Result<InstanceRoute> {
        let routes = self.routes.read().await;
        let found = routes.get(tenant).and_then(|routes| {
            routes.iter().find(|r| match (&request.route_id, &request.route_name) {
                (Some(id), _) => r.id == *id,
                (None, Some(name)) => r.name == *name,
                (None, None) => false,
            })
        });
        found
            .cloned()
            .ok_or_else(|| TransportError::RouteNotFound(request.route_id.unwrap_or_default()))
    }

    async fn route(&self, tenant: &Tenant, route_id: Uuid) -> Option<InstanceRoute> {
        self.routes
            .read()
            .await
            .get(tenant)
            .and_then(|routes| routes.iter().find(|r| r.id == route_id))
            .cloned()
    }

    /// Oldest instance of the route still accepting passengers.
    async fn open_instance(&self, tenant: &Tenant, route_id: Uuid, now: DateTime<Utc>) -> Result<Option<TransportInstance>> {
        Ok(self
            .instances
            .entries(tenant)
            .await?
            .into_iter()
            .map(|(_, instance)| instance)
            .filter(|i| i.route_id == route_id && i.accepts_boarding(now))
            .min_by_key(|i| i.created_at))
    }

    /// Remove one passenger; an emptied instance is released.
    async fn drop_passenger(
        &self,
        tenant: &Tenant,
        character_id: u32,
    ) -> Result<Option<(TransportInstance, Passenger)>> {
        let Some(instance_id) = self.enrollments.remove(tenant, &character_id).await? else {
            return Ok(None);
        };
        let Some(mut instance) = self.instances.get(tenant, &instance_id).await? else {
            return Ok(None);
        };
        let Some(index) = instance
            .passengers
            .iter()
            .position(|p| p.character_id == character_id)
        else {
            return Ok(None);
        };
        let passenger = instance.passengers.remove(index);

        if instance.passengers.is_empty() {
            self.instances.remove(tenant, &instance_id).await?;
            debug!(instance_id = %instance_id, "Empty instance released");
        } else {
            self.instances.put(tenant, instance_id, instance.clone()).await?;
        }
        Ok(Some((instance, passenger)))
    }

    async fn release(&self, tenant: &Tenant, instance: &TransportInstance) -> Result<()> {
        for p in &instance.passengers {
            if self.enrollments.get(tenant, &p.character_id).await? == Some(instance.instance_id) {
                self.enrollments.remove(tenant, &p.character_id).await?;
            }
        }
        self.instances.remove(tenant, &instance.instance_id).await?;
        Ok(())
    }

    async fn cancel(
        &self,
        tenant: &Tenant,
        instance: &TransportInstance,
        passenger: &Passenger,
        reason: CancelReason,
    ) -> Result<()> {
        info!(
            tenant_id = %tenant.id,
            character_id = passenger.character_id,
            instance_id = %instance.instance_id,
            reason = ?reason,
            "Instance transport cancelled"
        );
        self.publish_event(tenant, CANCELLED, event(passenger, instance, Some(reason)), None)
            .await
    }

    async fn submit_warp(
        &self,
        tenant: &Tenant,
        transaction_id: Uuid,
        passenger: &Passenger,
        map_id: u32,
        instance: Option<Uuid>,
    ) -> Result<()> {
        let warp = Warp {
            character_id: passenger.character_id,
            world_id: passenger.world_id,
            channel_id: passenger.channel_id,
            map_id,
            portal_id: None,
            instance,
        };
        let saga = Saga::new(transaction_id, saga_types::TRANSPORT_WARP, "atlas-transports").step("warp", warp);
        let envelope = submit_envelope(&self.topics, tenant, &saga)?;
        self.bus.publish(Arc::new(envelope)).await?;
        Ok(())
    }

    async fn publish_event(
        &self,
        tenant: &Tenant,
        message_type: &str,
        body: InstanceEvent,
        transaction_id: Option<Uuid>,
    ) -> Result<()> {
        self.publish(tenant, message_type, body.character_id, &body, transaction_id)
            .await
    }

    async fn publish<T: Serialize>(
        &self,
        tenant: &Tenant,
        message_type: &str,
        character_id: u32,
        body: &T,
        transaction_id: Option<Uuid>,
    ) -> Result<()> {
        let mut envelope = Envelope::new(
            self.topics.name(Topic::EventInstanceTransport),
            character_id,
            tenant.clone(),
            message_type,
            body,
        )?;
        if let Some(txn) = transaction_id {
            envelope = envelope.with_transaction(txn);
        }
        self.bus.publish(Arc::new(envelope)).await?;
        Ok(())
    }
}

fn event(passenger: &Passenger, instance: &TransportInstance, reason: Option<CancelReason>) -> InstanceEvent {
    InstanceEvent {
        character_id: passenger.character_id,
        world_id: passenger.world_id,
        route_id: instance.route_id,
        instance_id: Some(instance.instance_id),
        reason,
        error_code: None,
    }
}

#[cfg(test)]
mod tests;
