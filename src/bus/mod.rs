//! Event bus for tenant-scoped envelopes.
//!
//! This module contains:
//! - `EventBus` trait: publish envelopes, subscribe handlers per topic
//! - `EventHandler` trait: processes one envelope
//! - `HandlerRegistry`: routes by `(topic, type)` and lifts the tenant scope
//! - Implementations: in-process channel, Kafka, Mock
//!
//! Delivery is at-least-once. Envelopes with the same key are handled in
//! publish order; different keys may interleave.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use crate::envelope::EnvelopeError;

pub mod channel;
pub mod dispatch;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

pub use channel::ChannelEventBus;
pub use dispatch::{handler_fn, DispatchResult, HandlerRegistry};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaEventBus, KafkaEventBusConfig};
pub use mock::MockEventBus;

use crate::envelope::Envelope;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Handler '{name}' failed: {message}")]
    HandlerFailed { name: String, message: String },

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Subscribe not supported for this bus type")]
    SubscribeNotSupported,
}

impl BusError {
    pub fn handler(name: impl Into<String>, message: impl ToString) -> Self {
        Self::HandlerFailed {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// Handler for processing envelopes from the bus.
pub trait EventHandler: Send + Sync {
    /// Process one envelope.
    fn handle(&self, envelope: Arc<Envelope>) -> BoxFuture<'static, Result<()>>;
}

/// Interface for envelope delivery between services.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an envelope to its topic, keyed by `envelope.key`.
    async fn publish(&self, envelope: Arc<Envelope>) -> Result<()>;

    /// Deliver every envelope on `topic` to `handler`.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()>;

    /// Begin consuming after all subscriptions are registered.
    async fn start(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process channel bus.
    #[default]
    Channel,
    /// Kafka.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    pub channel: ChannelBusConfig,
    pub kafka: KafkaConfig,
}

/// Channel-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelBusConfig {
    /// Ordered worker lanes per subscription; a key always maps to one lane.
    pub partitions: usize,
}

impl Default for ChannelBusConfig {
    fn default() -> Self {
        Self { partitions: 8 }
    }
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group ID; one per service.
    pub group_id: Option<String>,
    pub session_timeout_ms: u32,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: None,
            session_timeout_ms: 10_000,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize the event bus selected by configuration.
///
/// `group_id` names the consumer group when the config does not.
pub async fn init_event_bus(
    config: &MessagingConfig,
    group_id: &str,
) -> std::result::Result<Arc<dyn EventBus>, Box<dyn std::error::Error + Send + Sync>> {
    match config.messaging_type {
        MessagingType::Channel => {
            let bus = ChannelEventBus::new(config.channel.partitions);
            info!(messaging_type = "channel", "Event bus initialized");
            Ok(Arc::new(bus))
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let group = config
                    .kafka
                    .group_id
                    .clone()
                    .unwrap_or_else(|| group_id.to_string());
                let mut cfg = KafkaEventBusConfig::new(&config.kafka.bootstrap_servers, group)
                    .with_session_timeout_ms(config.kafka.session_timeout_ms);
                if let (Some(user), Some(pass), Some(mechanism)) = (
                    &config.kafka.sasl_username,
                    &config.kafka.sasl_password,
                    &config.kafka.sasl_mechanism,
                ) {
                    cfg = cfg.with_sasl(user, pass, mechanism);
                }
                if let Some(protocol) = &config.kafka.security_protocol {
                    cfg = cfg.with_security_protocol(protocol);
                }

                let bus = KafkaEventBus::new(cfg)?;
                info!(messaging_type = "kafka", "Event bus initialized");
                Ok(Arc::new(bus))
            }

            #[cfg(not(feature = "kafka"))]
            {
                let _ = group_id;
                Err("Kafka support requires the 'kafka' feature. Rebuild with --features kafka".into())
            }
        }
    }
}
