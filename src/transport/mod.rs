//! Transport scheduling.
//!
//! Two kinds of transport move characters between maps:
//! - Scheduled routes (ships, trains) run a fixed cycle of boarding,
//!   pre-departure, travel and arrival. The phase of a route is a pure
//!   function of wall-clock time, so a restarted scheduler resumes without a
//!   journal.
//! - Instance routes are started on demand by a character and carry a
//!   capacity-bounded group through a private copy of the transit maps.
//!
//! Modules:
//! - `route`: route definitions and the phase function
//! - `presence`: which character is on which map
//! - `scheduler`: warps at scheduled route boundaries
//! - `instance`: instance transport lifecycle
//! - `messages`: event bodies
//! - `consumer`: bus wiring

use serde::Deserialize;
use uuid::Uuid;

use crate::bus::BusError;
use crate::envelope::{EnvelopeError, ErrorCode};
use crate::registry::RegistryError;

pub mod consumer;
pub mod instance;
pub mod messages;
pub mod presence;
pub mod route;
pub mod scheduler;

pub use instance::{InstanceManager, InstanceState, Passenger, TransportInstance};
pub use presence::{Location, Presence};
pub use route::{Boundary, InstanceRoute, InstanceRouteConfig, Phase, Route, RouteConfig};
pub use scheduler::RouteScheduler;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by the transport scheduler.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid route {name}: {reason}")]
    InvalidRoute { name: String, reason: String },

    #[error("Route not found: {0}")]
    RouteNotFound(Uuid),

    #[error("Character {0} is already in transit")]
    AlreadyInTransit(u32),

    #[error("Transport {0} is full")]
    CapacityFull(Uuid),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl TransportError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRoute {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Code reported to the requester in an `ERROR` event.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RouteNotFound(_) => ErrorCode::RouteNotFound,
            Self::AlreadyInTransit(_) => ErrorCode::AlreadyInTransit,
            Self::CapacityFull(_) => ErrorCode::TransportCapacityFull,
            Self::InvalidRoute { .. } => ErrorCode::Generic,
            Self::Registry(_) | Self::Bus(_) | Self::Envelope(_) => ErrorCode::ServiceError,
        }
    }
}

/// Route definitions of one tenant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TenantRoutes {
    pub tenant_id: Uuid,
    pub routes: Vec<RouteConfig>,
    pub instance_routes: Vec<InstanceRouteConfig>,
}

/// Transport service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Scheduler tick; boundaries are acted on within one tick.
    pub tick_interval_ms: u64,
    /// How long past its arrival an instance may go unprocessed before it is
    /// declared stuck.
    pub stuck_grace_secs: u64,
    pub routes: Vec<TenantRoutes>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            stuck_grace_secs: 60,
            routes: Vec::new(),
        }
    }
}

impl TransportConfig {
    /// Check every route of every tenant.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(TransportError::invalid("*", "tick_interval_ms must be positive"));
        }
        for tenant in &self.routes {
            for route in &tenant.routes {
                route.validate()?;
            }
            for route in &tenant.instance_routes {
                route.validate()?;
            }
        }
        Ok(())
    }

    /// Routes configured for `tenant_id`.
    pub fn for_tenant(&self, tenant_id: Uuid) -> Option<&TenantRoutes> {
        self.routes.iter().find(|r| r.tenant_id == tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            TransportError::CapacityFull(Uuid::nil()).error_code(),
            ErrorCode::TransportCapacityFull
        );
        assert_eq!(TransportError::AlreadyInTransit(1).error_code(), ErrorCode::AlreadyInTransit);
        assert_eq!(TransportError::RouteNotFound(Uuid::nil()).error_code(), ErrorCode::RouteNotFound);
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
tick_interval_ms: 500
routes:
  - tenant_id: 083839c6-c47c-42a6-9585-76492795d123
    routes:
      - name: ellinia-orbis
        start_map_id: 101000300
        staging_map_id: 101000301
        en_route_map_ids: [200090010]
        destination_map_id: 200000100
        observation_map_id: 200090000
        boarding_window_secs: 300
        pre_departure_secs: 60
        travel_secs: 600
        cycle_interval_secs: 1800
    instance_routes:
      - name: kerning-square
        start_map_id: 103000100
        transit_map_ids: [103000301]
        destination_map_id: 103040000
        capacity: 6
        boarding_window_secs: 10
        travel_secs: 60
"#;
        let config: TransportConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        let tenant = config.for_tenant("083839c6-c47c-42a6-9585-76492795d123".parse().unwrap()).unwrap();
        assert_eq!(tenant.routes[0].en_route_map_ids, vec![200090010]);
        assert_eq!(tenant.instance_routes[0].capacity, 6);
        assert_eq!(config.stuck_grace_secs, 60);
    }

    #[test]
    fn test_zero_capacity_instance_route_rejected() {
        let config = TransportConfig {
            routes: vec![TenantRoutes {
                tenant_id: Uuid::nil(),
                routes: Vec::new(),
                instance_routes: vec![InstanceRouteConfig {
                    name: "broken".to_string(),
                    start_map_id: 1,
                    transit_map_ids: vec![2],
                    destination_map_id: 3,
                    capacity: 0,
                    ..InstanceRouteConfig::default()
                }],
            }],
            ..TransportConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
