//! Domain error codes surfaced in status-event bodies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error taxonomy shared across services. Names are wire contracts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Capacity/limit
    StorageFull,
    BuddyListFull,
    OtherBuddyListFull,
    TransportCapacityFull,
    InvalidCapacity,
    // State/precondition
    AlreadyBuddy,
    AlreadyInTransit,
    NotEnoughMesos,
    OneOfAKind,
    CannotBuddyGm,
    // Not found
    CharacterNotFound,
    RouteNotFound,
    // Orchestration
    Timeout,
    Cancelled,
    ValidationFailed,
    // Fallback
    Generic,
    UnknownError,
    ServiceError,
    /// A code this build does not know; preserved verbatim.
    Other(String),
}

/// Coarse grouping of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Capacity,
    State,
    NotFound,
    Orchestration,
    Fallback,
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::StorageFull => "STORAGE_FULL",
            Self::BuddyListFull => "BUDDY_LIST_FULL",
            Self::OtherBuddyListFull => "OTHER_BUDDY_LIST_FULL",
            Self::TransportCapacityFull => "TRANSPORT_CAPACITY_FULL",
            Self::InvalidCapacity => "INVALID_CAPACITY",
            Self::AlreadyBuddy => "ALREADY_BUDDY",
            Self::AlreadyInTransit => "ALREADY_IN_TRANSIT",
            Self::NotEnoughMesos => "NOT_ENOUGH_MESOS",
            Self::OneOfAKind => "ONE_OF_A_KIND",
            Self::CannotBuddyGm => "CANNOT_BUDDY_GM",
            Self::CharacterNotFound => "CHARACTER_NOT_FOUND",
            Self::RouteNotFound => "ROUTE_NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Generic => "GENERIC",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::ServiceError => "SERVICE_ERROR",
            Self::Other(s) => s,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StorageFull
            | Self::BuddyListFull
            | Self::OtherBuddyListFull
            | Self::TransportCapacityFull
            | Self::InvalidCapacity => ErrorCategory::Capacity,
            Self::AlreadyBuddy
            | Self::AlreadyInTransit
            | Self::NotEnoughMesos
            | Self::OneOfAKind
            | Self::CannotBuddyGm => ErrorCategory::State,
            Self::CharacterNotFound | Self::RouteNotFound => ErrorCategory::NotFound,
            Self::Timeout | Self::Cancelled | Self::ValidationFailed => {
                ErrorCategory::Orchestration
            }
            Self::Generic | Self::UnknownError | Self::ServiceError | Self::Other(_) => {
                ErrorCategory::Fallback
            }
        }
    }
}

impl FromStr for ErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "STORAGE_FULL" => Self::StorageFull,
            "BUDDY_LIST_FULL" => Self::BuddyListFull,
            "OTHER_BUDDY_LIST_FULL" => Self::OtherBuddyListFull,
            "TRANSPORT_CAPACITY_FULL" => Self::TransportCapacityFull,
            "INVALID_CAPACITY" => Self::InvalidCapacity,
            "ALREADY_BUDDY" => Self::AlreadyBuddy,
            "ALREADY_IN_TRANSIT" => Self::AlreadyInTransit,
            "NOT_ENOUGH_MESOS" => Self::NotEnoughMesos,
            "ONE_OF_A_KIND" => Self::OneOfAKind,
            "CANNOT_BUDDY_GM" => Self::CannotBuddyGm,
            "CHARACTER_NOT_FOUND" => Self::CharacterNotFound,
            "ROUTE_NOT_FOUND" => Self::RouteNotFound,
            "TIMEOUT" => Self::Timeout,
            "CANCELLED" => Self::Cancelled,
            "VALIDATION_FAILED" => Self::ValidationFailed,
            "GENERIC" => Self::Generic,
            "UNKNOWN_ERROR" => Self::UnknownError,
            "SERVICE_ERROR" => Self::ServiceError,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.parse::<ErrorCode>() {
            Ok(code) => Ok(code),
            Err(never) => match never {},
        }
    }
}
