//! Route definitions and the scheduled-route phase function.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Result, TransportError};
use crate::tenant::Tenant;

/// A scheduled route as configured.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Stable id; derived from the tenant and name when unset.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub start_map_id: u32,
    pub staging_map_id: u32,
    #[serde(default)]
    pub en_route_map_ids: Vec<u32>,
    pub destination_map_id: u32,
    pub observation_map_id: u32,
    pub boarding_window_secs: u64,
    #[serde(default)]
    pub pre_departure_secs: u64,
    pub travel_secs: u64,
    pub cycle_interval_secs: u64,
    /// Instant of a boarding open; cycles repeat from here in both directions.
    #[serde(default)]
    pub cycle_anchor: Option<DateTime<Utc>>,
}

impl RouteConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TransportError::invalid("?", "route name is empty"));
        }
        if self.cycle_interval_secs == 0 {
            return Err(TransportError::invalid(&self.name, "cycle interval must be positive"));
        }
        if self.boarding_window_secs == 0 || self.travel_secs == 0 {
            return Err(TransportError::invalid(&self.name, "boarding window and travel must be positive"));
        }
        let active = self.boarding_window_secs + self.pre_departure_secs + self.travel_secs;
        if active > self.cycle_interval_secs {
            return Err(TransportError::invalid(
                &self.name,
                format!(
                    "boarding + pre-departure + travel ({}s) exceeds the cycle interval ({}s)",
                    active, self.cycle_interval_secs
                ),
            ));
        }
        Ok(())
    }
}

/// Phase of a scheduled route at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    Boarding,
    PreDeparture,
    Traveling,
    /// Only at the exact arrival instant.
    Arriving,
}

/// Instants at which a scheduled route acts.
///
/// Declaration order breaks ties between boundaries at the same instant: an
/// arrival that coincides with the next boarding open is handled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Boundary {
    /// Observation and en-route maps are emptied to the destination.
    Arrives,
    BoardingOpens,
    /// The start map is emptied to staging.
    BoardingCloses,
    /// Staging is emptied to observation.
    Departs,
}

/// A validated scheduled route.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: Uuid,
    pub name: String,
    pub start_map_id: u32,
    pub staging_map_id: u32,
    pub en_route_map_ids: Vec<u32>,
    pub destination_map_id: u32,
    pub observation_map_id: u32,
    pub boarding_window: Duration,
    pub pre_departure: Duration,
    pub travel: Duration,
    pub cycle_interval: Duration,
    pub cycle_anchor: DateTime<Utc>,
}

impl Route {
    pub fn from_config(tenant: &Tenant, config: &RouteConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: config
                .id
                .unwrap_or_else(|| Uuid::new_v5(&tenant.id, config.name.as_bytes())),
            name: config.name.clone(),
            start_map_id: config.start_map_id,
            staging_map_id: config.staging_map_id,
            en_route_map_ids: config.en_route_map_ids.clone(),
            destination_map_id: config.destination_map_id,
            observation_map_id: config.observation_map_id,
            boarding_window: secs(config.boarding_window_secs),
            pre_departure: secs(config.pre_departure_secs),
            travel: secs(config.travel_secs),
            cycle_interval: secs(config.cycle_interval_secs),
            cycle_anchor: config.cycle_anchor.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        })
    }

    fn offset_of(&self, boundary: Boundary) -> i64 {
        let closes = self.boarding_window.num_milliseconds();
        let departs = closes + self.pre_departure.num_milliseconds();
        match boundary {
            Boundary::BoardingOpens => 0,
            Boundary::BoardingCloses => closes,
            Boundary::Departs => departs,
            Boundary::Arrives => departs + self.travel.num_milliseconds(),
        }
    }

    fn cycle_ms(&self) -> i64 {
        self.cycle_interval.num_milliseconds()
    }

    /// Phase at `t`. Depends on nothing but `t` and the route.
    pub fn phase_at(&self, t: DateTime<Utc>) -> Phase {
        let offset = (t - self.cycle_anchor)
            .num_milliseconds()
            .rem_euclid(self.cycle_ms());
        if offset < self.offset_of(Boundary::BoardingCloses) {
            Phase::Boarding
        } else if offset < self.offset_of(Boundary::Departs) {
            Phase::PreDeparture
        } else if offset < self.offset_of(Boundary::Arrives) {
            Phase::Traveling
        } else if offset == self.offset_of(Boundary::Arrives) {
            Phase::Arriving
        } else {
            Phase::Idle
        }
    }

    /// Start of the cycle containing `t`.
    pub fn cycle_start(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let offset = (t - self.cycle_anchor)
            .num_milliseconds()
            .rem_euclid(self.cycle_ms());
        t - Duration::milliseconds(offset)
    }

    /// Every boundary in `(from, to]`, in time order.
    pub fn boundaries_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<(DateTime<Utc>, Boundary)> {
        let mut out = Vec::new();
        if to <= from {
            return out;
        }
        let cycle = self.cycle_ms();
        let since_anchor = (from - self.cycle_anchor).num_milliseconds();

        for boundary in [
            Boundary::Arrives,
            Boundary::BoardingOpens,
            Boundary::BoardingCloses,
            Boundary::Departs,
        ] {
            let offset = self.offset_of(boundary);
            let mut k = (since_anchor - offset).div_euclid(cycle) + 1;
            loop {
                let at = self.cycle_anchor + Duration::milliseconds(k * cycle + offset);
                if at > to {
                    break;
                }
                out.push((at, boundary));
                k += 1;
            }
        }
        out.sort();
        out
    }

    /// Maps emptied to the destination on arrival.
    pub fn arrival_sources(&self) -> Vec<u32> {
        let mut maps = vec![self.observation_map_id];
        maps.extend(self.en_route_map_ids.iter().copied().filter(|m| *m != self.observation_map_id));
        maps
    }
}

/// An on-demand route as configured.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstanceRouteConfig {
    pub id: Option<Uuid>,
    pub name: String,
    pub start_map_id: u32,
    /// Instanced maps travelled through; the first is boarded, the last is
    /// where the group rides out the trip.
    pub transit_map_ids: Vec<u32>,
    pub destination_map_id: u32,
    pub capacity: u32,
    pub boarding_window_secs: u64,
    pub travel_secs: u64,
}

impl InstanceRouteConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TransportError::invalid("?", "instance route name is empty"));
        }
        if self.capacity == 0 {
            return Err(TransportError::invalid(&self.name, "capacity must be positive"));
        }
        if self.transit_map_ids.is_empty() {
            return Err(TransportError::invalid(&self.name, "no transit maps"));
        }
        if self.travel_secs == 0 {
            return Err(TransportError::invalid(&self.name, "travel must be positive"));
        }
        Ok(())
    }
}

/// A validated on-demand route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRoute {
    pub id: Uuid,
    pub name: String,
    pub start_map_id: u32,
    pub transit_map_ids: Vec<u32>,
    pub destination_map_id: u32,
    pub capacity: u32,
    pub boarding_window_secs: u64,
    pub travel_secs: u64,
}

impl InstanceRoute {
    pub fn from_config(tenant: &Tenant, config: &InstanceRouteConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            id: config
                .id
                .unwrap_or_else(|| Uuid::new_v5(&tenant.id, config.name.as_bytes())),
            name: config.name.clone(),
            start_map_id: config.start_map_id,
            transit_map_ids: config.transit_map_ids.clone(),
            destination_map_id: config.destination_map_id,
            capacity: config.capacity,
            boarding_window_secs: config.boarding_window_secs,
            travel_secs: config.travel_secs,
        })
    }

    pub fn boarding_map_id(&self) -> u32 {
        self.transit_map_ids.first().copied().unwrap_or(self.start_map_id)
    }

    pub fn observation_map_id(&self) -> u32 {
        self.transit_map_ids.last().copied().unwrap_or(self.start_map_id)
    }

    pub fn is_transit_map(&self, map_id: u32) -> bool {
        self.transit_map_ids.contains(&map_id)
    }

    pub fn boarding_window(&self) -> Duration {
        secs(self.boarding_window_secs)
    }

    pub fn travel(&self) -> Duration {
        secs(self.travel_secs)
    }
}

fn secs(s: u64) -> Duration {
    Duration::seconds(s as i64)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn config() -> RouteConfig {
        RouteConfig {
            id: None,
            name: "ellinia-orbis".to_string(),
            start_map_id: 100,
            staging_map_id: 101,
            en_route_map_ids: vec![102],
            destination_map_id: 103,
            observation_map_id: 104,
            boarding_window_secs: 300,
            pre_departure_secs: 60,
            travel_secs: 600,
            cycle_interval_secs: 1800,
            cycle_anchor: Some(t0()),
        }
    }

    fn route() -> Route {
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        Route::from_config(&tenant, &config()).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    #[test]
    fn test_phase_windows() {
        let r = route();
        assert_eq!(r.phase_at(at(0)), Phase::Boarding);
        assert_eq!(r.phase_at(at(2)), Phase::Boarding);
        assert_eq!(r.phase_at(at(5)), Phase::PreDeparture);
        assert_eq!(r.phase_at(at(6)), Phase::Traveling);
        assert_eq!(r.phase_at(at(15)), Phase::Traveling);
        assert_eq!(r.phase_at(at(16)), Phase::Arriving);
        assert_eq!(r.phase_at(at(16) + Duration::milliseconds(1)), Phase::Idle);
        assert_eq!(r.phase_at(at(29)), Phase::Idle);
        assert_eq!(r.phase_at(at(30)), Phase::Boarding);
    }

    #[test]
    fn test_phase_before_anchor_repeats_cycle() {
        let r = route();
        assert_eq!(r.phase_at(at(-30)), Phase::Boarding);
        assert_eq!(r.phase_at(at(-25)), Phase::PreDeparture);
        assert_eq!(r.phase_at(at(-1)), Phase::Idle);
    }

    #[test]
    fn test_phase_is_pure() {
        let a = route();
        let b = route();
        for minute in -90..90 {
            assert_eq!(a.phase_at(at(minute)), b.phase_at(at(minute)));
        }
    }

    #[test]
    fn test_boundaries_between_is_half_open() {
        let r = route();
        let hits = r.boundaries_between(at(0), at(16));
        assert_eq!(
            hits,
            vec![
                (at(5), Boundary::BoardingCloses),
                (at(6), Boundary::Departs),
                (at(16), Boundary::Arrives),
            ]
        );

        let next = r.boundaries_between(at(16), at(35));
        assert_eq!(next, vec![(at(30), Boundary::BoardingOpens), (at(35), Boundary::BoardingCloses)]);
    }

    #[test]
    fn test_arrival_coinciding_with_next_boarding_sorts_first() {
        let mut c = config();
        c.cycle_interval_secs = 960;
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        let r = Route::from_config(&tenant, &c).unwrap();

        let hits = r.boundaries_between(at(15), at(16));
        assert_eq!(hits, vec![(at(16), Boundary::Arrives), (at(16), Boundary::BoardingOpens)]);
    }

    #[test]
    fn test_cycle_start() {
        let r = route();
        assert_eq!(r.cycle_start(at(47)), at(30));
        assert_eq!(r.cycle_start(at(-1)), at(-30));
    }

    #[test]
    fn test_validation() {
        let mut c = config();
        c.travel_secs = 1_500;
        assert!(c.validate().is_err());

        let mut c = config();
        c.cycle_interval_secs = 0;
        assert!(c.validate().is_err());

        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_route_id_is_stable_per_tenant() {
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        let a = Route::from_config(&tenant, &config()).unwrap();
        let b = Route::from_config(&tenant, &config()).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_arrival_sources_include_en_route_maps() {
        assert_eq!(route().arrival_sources(), vec![104, 102]);
    }
}
