//! Bus wiring for the transport service.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use super::instance::InstanceManager;
use super::messages::{
    CharacterStatus, MapPresence, CHARACTER_ENTER, CHARACTER_EXIT, LOGIN, LOGOUT, MAP_CHANGED, START,
};
use super::presence::{Location, Presence};
use crate::bus::{handler_fn, BusError, HandlerRegistry};
use crate::envelope::{Envelope, Topic, Topics};
use crate::saga::actions::StartTransport;
use crate::saga::messages::{COMPLETED, FAILED};

fn location_of(status: &CharacterStatus) -> Location {
    Location {
        world_id: status.world_id,
        channel_id: status.channel_id,
        map_id: status.map_id,
        instance: status.instance,
    }
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

/// Register presence tracking and instance transport handlers.
pub fn register(
    registry: &mut HandlerRegistry,
    topics: &Topics,
    presence: &Presence,
    instances: &Arc<InstanceManager>,
) {
    let map_status = topics.name(Topic::EventMapStatus);
    let character_status = topics.name(Topic::EventCharacterStatus);

    let (p, m) = (presence.clone(), Arc::clone(instances));
    registry.register(
        map_status,
        CHARACTER_ENTER,
        "transport.map_enter",
        handler_fn(move |envelope| {
            let (presence, manager) = (p.clone(), Arc::clone(&m));
            async move {
                let Some(body) = decode::<MapPresence>(&envelope, "transport.map_enter") else {
                    return Ok(());
                };
                let location = Location {
                    world_id: body.world_id,
                    channel_id: body.channel_id,
                    map_id: body.map_id,
                    instance: body.instance,
                };
                presence
                    .enter(&envelope.tenant, body.character_id, location)
                    .await
                    .map_err(|e| BusError::handler("transport.map_enter", e))?;
                manager
                    .on_map_entered(&envelope.tenant, body.character_id, &location, Utc::now())
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("transport.map_enter", e))
            }
        }),
    );

    let p = presence.clone();
    registry.register(
        map_status,
        CHARACTER_EXIT,
        "transport.map_exit",
        handler_fn(move |envelope| {
            let presence = p.clone();
            async move {
                let Some(body) = decode::<MapPresence>(&envelope, "transport.map_exit") else {
                    return Ok(());
                };
                presence
                    .exit(&envelope.tenant, body.character_id, body.map_id)
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("transport.map_exit", e))
            }
        }),
    );

    let (p, m) = (presence.clone(), Arc::clone(instances));
    registry.register(
        character_status,
        MAP_CHANGED,
        "transport.map_changed",
        handler_fn(move |envelope| {
            let (presence, manager) = (p.clone(), Arc::clone(&m));
            async move {
                let Some(body) = decode::<CharacterStatus>(&envelope, "transport.map_changed") else {
                    return Ok(());
                };
                let location = location_of(&body);
                presence
                    .enter(&envelope.tenant, envelope.key, location)
                    .await
                    .map_err(|e| BusError::handler("transport.map_changed", e))?;
                manager
                    .on_map_changed(&envelope.tenant, envelope.key, &location)
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("transport.map_changed", e))
            }
        }),
    );

    let (p, m) = (presence.clone(), Arc::clone(instances));
    registry.register(
        character_status,
        LOGIN,
        "transport.login",
        handler_fn(move |envelope| {
            let (presence, manager) = (p.clone(), Arc::clone(&m));
            async move {
                let Some(body) = decode::<CharacterStatus>(&envelope, "transport.login") else {
                    return Ok(());
                };
                let location = location_of(&body);
                presence
                    .enter(&envelope.tenant, envelope.key, location)
                    .await
                    .map_err(|e| BusError::handler("transport.login", e))?;
                manager
                    .on_login(&envelope.tenant, envelope.key, &location)
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("transport.login", e))
            }
        }),
    );

    let (p, m) = (presence.clone(), Arc::clone(instances));
    registry.register(
        character_status,
        LOGOUT,
        "transport.logout",
        handler_fn(move |envelope| {
            let (presence, manager) = (p.clone(), Arc::clone(&m));
            async move {
                presence
                    .leave(&envelope.tenant, envelope.key)
                    .await
                    .map_err(|e| BusError::handler("transport.logout", e))?;
                manager
                    .on_logout(&envelope.tenant, envelope.key)
                    .await
                    .map(|_| ())
                    .map_err(|e| BusError::handler("transport.logout", e))
            }
        }),
    );

    let m = Arc::clone(instances);
    registry.register(
        topics.name(Topic::CommandInstanceTransport),
        START,
        "transport.start",
        handler_fn(move |envelope| {
            let manager = Arc::clone(&m);
            async move {
                let Some(request) = decode::<StartTransport>(&envelope, "transport.start") else {
                    return Ok(());
                };
                let tenant = &envelope.tenant;
                match manager.start(tenant, &request, envelope.transaction_id).await {
                    Ok(_) => Ok(()),
                    Err(e) => manager
                        .reject(tenant, &request, envelope.transaction_id, &e)
                        .await
                        .map_err(|e| BusError::handler("transport.start", e)),
                }
            }
        }),
    );

    for (status, failed) in [(COMPLETED, false), (FAILED, true)] {
        let m = Arc::clone(instances);
        registry.register(
            topics.name(Topic::EventSagaStatus),
            status,
            "transport.warp_settled",
            handler_fn(move |envelope| {
                let manager = Arc::clone(&m);
                async move {
                    let Some(txn) = envelope.transaction_id else {
                        return Ok(());
                    };
                    manager
                        .on_warp_settled(&envelope.tenant, txn, failed)
                        .await
                        .map(|_| ())
                        .map_err(|e| BusError::handler("transport.warp_settled", e))
                }
            }),
        );
    }
}
