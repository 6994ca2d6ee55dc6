//! Message envelope and routing contract.
//!
//! Every inter-service message is an [`Envelope`]: a numeric partition key
//! taken from the principal subject, tenant and trace metadata carried as
//! headers, and a JSON body of the shape
//! `{ "transactionId": .., "type": .., "body": { .. } }`.
//!
//! Same-key envelopes are delivered in produce order; nothing is promised
//! across keys.

mod codes;
pub mod headers;
mod topics;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tenant::Tenant;

pub use codes::{ErrorCategory, ErrorCode};
pub use headers::TraceContext;
pub use topics::{Topic, Topics, TopicsConfig};

/// Result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Errors raised while building or decoding envelopes.
///
/// All of these are local-only: a message that fails to decode is logged and
/// discarded, never answered with an event.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid header {name}: {value}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("Invalid partition key: {0}")]
    InvalidKey(String),

    #[error("Malformed body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Raw JSON shape on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction_id: Option<Uuid>,
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    body: Value,
}

/// A tenant-scoped command or event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub topic: String,
    /// Numeric id of the principal subject; determines the partition.
    pub key: u32,
    pub tenant: Tenant,
    pub trace: TraceContext,
    pub transaction_id: Option<Uuid>,
    /// Variant discriminator, e.g. `AWARD_MESOS`.
    pub message_type: String,
    pub body: Value,
}

impl Envelope {
    /// Build an envelope starting a new trace.
    pub fn new<B: Serialize>(
        topic: impl Into<String>,
        key: u32,
        tenant: Tenant,
        message_type: impl Into<String>,
        body: &B,
    ) -> Result<Self> {
        Ok(Self {
            topic: topic.into(),
            key,
            tenant,
            trace: TraceContext::root(),
            transaction_id: None,
            message_type: message_type.into(),
            body: serde_json::to_value(body)?,
        })
    }

    pub fn with_transaction(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// Continue the trace of `cause` as a child span.
    pub fn caused_by(mut self, cause: &Envelope) -> Self {
        self.trace = cause.trace.child();
        self
    }

    pub fn is(&self, message_type: &str) -> bool {
        self.message_type == message_type
    }

    /// Decode the variant body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.body)?)
    }

    /// Headers carried alongside the payload.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut out = headers::tenant_headers(&self.tenant);
        out.extend(self.trace.headers());
        out
    }

    /// Partition key bytes (decimal rendering of the subject id).
    pub fn key_bytes(&self) -> String {
        self.key.to_string()
    }

    /// Serialize the payload for the wire.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let wire = WireMessage {
            transaction_id: self.transaction_id,
            message_type: self.message_type.clone(),
            body: self.body.clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Rebuild an envelope from a consumed record.
    pub fn from_record<'a, K, I>(
        topic: &str,
        key: &[u8],
        header_pairs: I,
        payload: &[u8],
    ) -> Result<Self>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, &'a [u8])>,
    {
        let key_str = std::str::from_utf8(key)
            .map_err(|_| EnvelopeError::InvalidKey(hex::encode(key)))?;
        let key = key_str
            .trim()
            .parse::<u32>()
            .map_err(|_| EnvelopeError::InvalidKey(key_str.to_string()))?;

        let header_map = headers::collect(header_pairs);
        let tenant = headers::parse_tenant(&header_map)?;
        let trace = TraceContext::from_headers(&header_map);

        let wire: WireMessage = serde_json::from_slice(payload)?;
        Ok(Self {
            topic: topic.to_string(),
            key,
            tenant,
            trace,
            transaction_id: wire.transaction_id,
            message_type: wire.message_type,
            body: wire.body,
        })
    }
}

/// Partition key for saga-level topics: the low 32 bits of the transaction id.
pub fn transaction_key(transaction_id: Uuid) -> u32 {
    transaction_id.as_u128() as u32
}

/// Stable partition key for subjects identified by name (routes).
pub fn name_key(tenant: &Tenant, name: &str) -> u32 {
    Uuid::new_v5(&tenant.id, name.as_bytes()).as_u128() as u32
}

#[cfg(test)]
mod tests;
