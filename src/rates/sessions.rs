//! Playtime session log.
//!
//! Only time spent logged in advances bonus-exp tiers. Each character keeps
//! the sessions of the last two days, the longest span the midnight rule
//! looks back over.

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::{InMemoryRegistry, Result, TenantRegistry};
use crate::tenant::Tenant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub login_at: DateTime<Utc>,
    /// Open while the character is online.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_at: Option<DateTime<Utc>>,
}

/// Sessions of one character, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    pub world_id: u8,
    pub sessions: Vec<Session>,
}

impl SessionHistory {
    pub fn is_online(&self) -> bool {
        self.sessions.last().is_some_and(|s| s.logout_at.is_none())
    }
}

/// Time played within `[from, to]`. An open session counts up to `to`; a
/// closed one counts through the end of the minute it was closed in.
pub fn played(sessions: &[Session], from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    sessions
        .iter()
        .map(|s| {
            let start = s.login_at.max(from);
            let end = s.logout_at.map_or(to, closing_minute_end).min(to);
            (end - start).max(Duration::zero())
        })
        .fold(Duration::zero(), |acc, d| acc + d)
}

fn closing_minute_end(logout_at: DateTime<Utc>) -> DateTime<Utc> {
    let into_minute = Duration::seconds(i64::from(logout_at.second()))
        + Duration::nanoseconds(i64::from(logout_at.nanosecond()));
    logout_at - into_minute + Duration::minutes(1)
}

/// Whole hours played within `[from, to]`.
pub fn played_hours(sessions: &[Session], from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    played(sessions, from, to).num_hours()
}

/// Registry-backed session log keyed by character id.
#[derive(Clone)]
pub struct SessionLog {
    registry: Arc<dyn TenantRegistry<u32, SessionHistory>>,
    retention: Duration,
}

impl SessionLog {
    pub fn new(registry: Arc<dyn TenantRegistry<u32, SessionHistory>>) -> Self {
        Self {
            registry,
            retention: Duration::hours(48),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryRegistry::new()))
    }

    /// Open a session. A session left open by a missed logout is closed at `at`.
    pub async fn login(&self, tenant: &Tenant, character_id: u32, world_id: u8, at: DateTime<Utc>) -> Result<()> {
        let mut history = self.registry.get(tenant, &character_id).await?.unwrap_or_default();
        history.world_id = world_id;
        if let Some(open) = history.sessions.last_mut().filter(|s| s.logout_at.is_none()) {
            debug!(character_id, "Closing session left open by a missed logout");
            open.logout_at = Some(at);
        }
        let horizon = at - self.retention;
        history
            .sessions
            .retain(|s| s.logout_at.map_or(true, |end| end >= horizon));
        history.sessions.push(Session {
            login_at: at,
            logout_at: None,
        });
        self.registry.put(tenant, character_id, history).await
    }

    /// Close the open session. Returns false when none was open.
    pub async fn logout(&self, tenant: &Tenant, character_id: u32, at: DateTime<Utc>) -> Result<bool> {
        let Some(mut history) = self.registry.get(tenant, &character_id).await? else {
            return Ok(false);
        };
        let Some(open) = history.sessions.last_mut().filter(|s| s.logout_at.is_none()) else {
            return Ok(false);
        };
        open.logout_at = Some(at.max(open.login_at));
        self.registry.put(tenant, character_id, history).await?;
        Ok(true)
    }

    pub async fn history(&self, tenant: &Tenant, character_id: u32) -> Result<Option<SessionHistory>> {
        self.registry.get(tenant, &character_id).await
    }

    pub async fn tenants(&self) -> Result<Vec<Tenant>> {
        self.registry.tenants().await
    }

    /// Characters with an open session.
    pub async fn online(&self, tenant: &Tenant) -> Result<Vec<u32>> {
        Ok(self
            .registry
            .entries(tenant)
            .await?
            .into_iter()
            .filter(|(_, history)| history.is_online())
            .map(|(character_id, _)| character_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn closed(from: DateTime<Utc>, to: DateTime<Utc>) -> Session {
        Session {
            login_at: from,
            logout_at: Some(to),
        }
    }

    #[test]
    fn test_idle_time_between_sessions_does_not_count() {
        let sessions = [closed(at(10, 0), at(10, 59)), closed(at(13, 0), at(14, 29))];
        assert_eq!(played(&sessions, at(9, 0), at(15, 0)), Duration::minutes(150));
        assert_eq!(played_hours(&sessions, at(9, 0), at(15, 0)), 2);
    }

    #[test]
    fn test_closing_minute_is_played() {
        let sessions = [closed(at(22, 0), at(23, 59))];
        let midnight = at(23, 0) + Duration::hours(1);
        assert_eq!(played(&sessions, at(0, 0), midnight), Duration::hours(2));
        assert_eq!(played_hours(&sessions, at(0, 0), midnight), 2);

        // The minute never extends past the queried bound.
        assert_eq!(played_hours(&sessions, at(0, 0), at(23, 59)), 1);

        let mid_minute = closed(at(22, 0), at(22, 30) + Duration::seconds(15));
        assert_eq!(played(&[mid_minute], at(0, 0), midnight), Duration::minutes(31));
    }

    #[test]
    fn test_intersection_clips_to_bounds() {
        let sessions = [closed(at(10, 0), at(14, 0))];
        assert_eq!(played(&sessions, at(11, 0), at(12, 30)), Duration::minutes(90));
        assert_eq!(played(&sessions, at(15, 0), at(16, 0)), Duration::zero());
    }

    #[test]
    fn test_open_session_counts_to_query_instant() {
        let sessions = [Session {
            login_at: at(10, 0),
            logout_at: None,
        }];
        assert_eq!(played_hours(&sessions, at(10, 0), at(12, 59)), 2);
    }

    #[tokio::test]
    async fn test_login_logout_cycle() {
        let log = SessionLog::in_memory();
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);

        log.login(&tenant, 7, 0, at(10, 0)).await.unwrap();
        assert!(log.history(&tenant, 7).await.unwrap().unwrap().is_online());

        assert!(log.logout(&tenant, 7, at(11, 0)).await.unwrap());
        assert!(!log.logout(&tenant, 7, at(11, 5)).await.unwrap());

        let history = log.history(&tenant, 7).await.unwrap().unwrap();
        assert_eq!(history.sessions, vec![closed(at(10, 0), at(11, 0))]);
    }

    #[tokio::test]
    async fn test_online_lists_open_sessions() {
        let log = SessionLog::in_memory();
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);

        log.login(&tenant, 7, 0, at(10, 0)).await.unwrap();
        log.login(&tenant, 8, 0, at(10, 0)).await.unwrap();
        log.logout(&tenant, 8, at(10, 30)).await.unwrap();

        assert_eq!(log.online(&tenant).await.unwrap(), vec![7]);
        assert_eq!(log.tenants().await.unwrap(), vec![tenant]);
    }

    #[tokio::test]
    async fn test_missed_logout_closed_on_next_login() {
        let log = SessionLog::in_memory();
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);

        log.login(&tenant, 7, 0, at(10, 0)).await.unwrap();
        log.login(&tenant, 7, 0, at(12, 0)).await.unwrap();

        let history = log.history(&tenant, 7).await.unwrap().unwrap();
        assert_eq!(history.sessions.len(), 2);
        assert_eq!(history.sessions[0].logout_at, Some(at(12, 0)));
    }

    #[tokio::test]
    async fn test_old_sessions_pruned() {
        let log = SessionLog::in_memory();
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);

        log.login(&tenant, 7, 0, at(10, 0)).await.unwrap();
        log.logout(&tenant, 7, at(11, 0)).await.unwrap();
        log.login(&tenant, 7, 0, at(11, 0) + Duration::days(3)).await.unwrap();

        let history = log.history(&tenant, 7).await.unwrap().unwrap();
        assert_eq!(history.sessions.len(), 1);
    }
}
