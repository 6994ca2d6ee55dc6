//! Transport event bodies and the map/character events consumed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::ErrorCode;

/// Scheduled route status types on `EVENT_TOPIC_TRANSPORT_STATUS`.
pub const ARRIVED: &str = "ARRIVED";
pub const DEPARTED: &str = "DEPARTED";

/// Instance transport command on `COMMAND_TOPIC_INSTANCE_TRANSPORT`.
pub const START: &str = "START";

/// Instance transport events on `EVENT_TOPIC_INSTANCE_TRANSPORT`.
pub const STARTED: &str = "STARTED";
pub const ACCEPTED: &str = "ACCEPTED";
pub const ERROR: &str = "ERROR";
pub const COMPLETED: &str = "COMPLETED";
pub const CANCELLED: &str = "CANCELLED";
pub const TRANSIT_ENTERED: &str = "TRANSIT_ENTERED";

/// Map status types on `EVENT_TOPIC_MAP_STATUS`.
pub const CHARACTER_ENTER: &str = "CHARACTER_ENTER";
pub const CHARACTER_EXIT: &str = "CHARACTER_EXIT";

/// Character status types on `EVENT_TOPIC_CHARACTER_STATUS`.
pub const LOGIN: &str = "LOGIN";
pub const LOGOUT: &str = "LOGOUT";
pub const MAP_CHANGED: &str = "MAP_CHANGED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    pub route_id: Uuid,
    pub route_name: String,
    /// Map the vessel left (departure) or reached (arrival).
    pub map_id: u32,
}

/// Why an instance transport ended early for a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    Stuck,
    Logout,
    MapExit,
    Shutdown,
    WarpFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceEvent {
    pub character_id: u32,
    pub world_id: u8,
    pub route_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CancelReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// Sent when a passenger enters one of their trip's transit maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitEntered {
    pub character_id: u32,
    pub world_id: u8,
    pub channel_id: u8,
    pub route_id: Uuid,
    pub instance_id: Uuid,
    pub map_id: u32,
    /// Seconds until the instance arrives, zero once overdue.
    pub remaining_secs: u32,
}

/// `CHARACTER_ENTER` / `CHARACTER_EXIT`; keyed by map.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPresence {
    pub character_id: u32,
    pub world_id: u8,
    pub channel_id: u8,
    pub map_id: u32,
    #[serde(default)]
    pub instance: Option<Uuid>,
}

/// `LOGIN`, `LOGOUT`, `MAP_CHANGED`; keyed by character.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterStatus {
    pub world_id: u8,
    pub channel_id: u8,
    #[serde(default, alias = "targetMapId")]
    pub map_id: u32,
    #[serde(default)]
    pub instance: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cancelled_wire_shape() {
        let event = InstanceEvent {
            character_id: 7,
            world_id: 0,
            route_id: Uuid::nil(),
            instance_id: None,
            reason: Some(CancelReason::MapExit),
            error_code: None,
        };
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(value["reason"], "MAP_EXIT");
        assert!(value.get("errorCode").is_none());
    }

    #[test]
    fn test_map_changed_accepts_target_map_alias() {
        let status: CharacterStatus =
            serde_json::from_value(json!({ "worldId": 0, "channelId": 1, "targetMapId": 100 })).unwrap();
        assert_eq!(status.map_id, 100);
    }
}
