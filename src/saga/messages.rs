//! Saga topic message bodies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actions::SendMessage;
use super::model::{saga_types, Saga};
use crate::envelope::{self, Envelope, EnvelopeError, ErrorCode, Topic, Topics};
use crate::tenant::Tenant;

/// Command type on `COMMAND_TOPIC_SAGA`.
pub const SUBMIT: &str = "SUBMIT";
/// Status types on `EVENT_TOPIC_SAGA_STATUS`.
pub const COMPLETED: &str = "COMPLETED";
pub const FAILED: &str = "FAILED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaCompleted {
    pub transaction_id: Uuid,
    pub saga_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaFailed {
    pub transaction_id: Uuid,
    pub saga_type: String,
    pub failed_step: String,
    pub error_code: ErrorCode,
    pub reason: String,
    /// At least one compensation could not be issued.
    #[serde(default)]
    pub partially_compensated: bool,
}

/// Failure fields carried by a domain `ERROR` status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusFailure {
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Envelope submitting `saga` to the orchestrator.
pub fn submit_envelope(topics: &Topics, tenant: &Tenant, saga: &Saga) -> Result<Envelope, EnvelopeError> {
    Ok(Envelope::new(
        topics.name(Topic::CommandSaga),
        envelope::transaction_key(saga.transaction_id),
        tenant.clone(),
        SUBMIT,
        saga,
    )?
    .with_transaction(saga.transaction_id))
}

/// Single-step saga sending pink text to one character.
pub fn message_saga(character_id: u32, message: impl Into<String>, initiated_by: impl Into<String>) -> Saga {
    Saga::new(Uuid::new_v4(), saga_types::TRANSPORT_NOTICE, initiated_by)
        .step("notify", SendMessage::pink(character_id, message))
}

/// Player-facing text for a transport failure.
pub fn transport_failure_text(code: &ErrorCode) -> &'static str {
    match code {
        ErrorCode::TransportCapacityFull => "The transport is full. Please wait for the next one.",
        ErrorCode::AlreadyInTransit => "You are already aboard a transport.",
        ErrorCode::RouteNotFound => "This transport is not in service.",
        _ => "The transport could not be boarded.",
    }
}
