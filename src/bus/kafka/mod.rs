//! Kafka event bus implementation.
//!
//! Topic names are taken verbatim from the envelope. The record key is the
//! decimal subject id, so per-subject streams land on one partition and are
//! totally ordered. Tenant and trace metadata travel as record headers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{BusError, EventBus, EventHandler, Result};
use crate::envelope::Envelope;

/// Configuration for Kafka connection.
#[derive(Clone, Debug)]
pub struct KafkaEventBusConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group ID.
    pub group_id: String,
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

impl KafkaEventBusConfig {
    pub fn new(bootstrap_servers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: group_id.into(),
            session_timeout_ms: 10_000,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
        }
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    pub fn with_session_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.session_timeout_ms = timeout_ms;
        self
    }

    /// Build a ClientConfig for producers.
    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");
        config.set("enable.idempotence", "true");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers.
    fn build_consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", &self.group_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");
        config.set("session.timeout.ms", self.session_timeout_ms.to_string());

        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }
        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }
    }
}

/// Kafka event bus.
///
/// One consumer serves every subscribed topic; records are handled one at
/// a time and the offset is committed after the handlers return.
pub struct KafkaEventBus {
    producer: FutureProducer,
    consumer: Arc<StreamConsumer>,
    config: KafkaEventBusConfig,
    handlers: Arc<RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>>,
}

impl KafkaEventBus {
    /// Create a new Kafka event bus.
    pub fn new(config: KafkaEventBusConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        let consumer: StreamConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            group_id = %config.group_id,
            "Connected to Kafka"
        );

        Ok(Self {
            producer,
            consumer: Arc::new(consumer),
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

/// Decode a consumed record into an envelope.
fn decode_record(message: &rdkafka::message::BorrowedMessage<'_>) -> Result<Envelope> {
    use rdkafka::message::Message as KafkaMessage;

    let payload = message
        .payload()
        .ok_or_else(|| BusError::Subscribe("Record with no payload".to_string()))?;
    let key = message.key().unwrap_or_default();
    let headers: Vec<(&str, &[u8])> = message
        .headers()
        .map(|h| h.iter().filter_map(|h| h.value.map(|v| (h.key, v))).collect())
        .unwrap_or_default();

    Ok(Envelope::from_record(message.topic(), key, headers, payload)?)
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(&self, envelope: Arc<Envelope>) -> Result<()> {
        let payload = envelope.to_payload()?;
        let key = envelope.key_bytes();

        let mut headers = OwnedHeaders::new();
        for (name, value) in envelope.headers() {
            headers = headers.insert(Header {
                key: name,
                value: Some(value.as_str()),
            });
        }

        let record = FutureRecord::to(&envelope.topic)
            .payload(&payload)
            .key(&key)
            .headers(headers);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| BusError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(
            topic = %envelope.topic,
            key = %key,
            message_type = %envelope.message_type,
            "Published envelope to Kafka"
        );
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.handlers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let topics: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        if topics.is_empty() {
            warn!(group_id = %self.config.group_id, "No subscriptions, consumer not started");
            return Ok(());
        }

        let topic_refs: Vec<&str> = topics.iter().map(|s| s.as_str()).collect();
        self.consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::Subscribe(format!("Failed to subscribe to topics: {}", e)))?;

        info!(topics = ?topics, "Subscribed to Kafka topics");

        let consumer = Arc::clone(&self.consumer);
        let handlers = Arc::clone(&self.handlers);

        tokio::spawn(async move {
            use futures::StreamExt;
            use rdkafka::message::Message as KafkaMessage;

            let mut stream = consumer.stream();

            while let Some(result) = stream.next().await {
                let message = match result {
                    Ok(m) => m,
                    Err(e) => {
                        error!(error = %e, "Kafka consumer error");
                        continue;
                    }
                };

                match decode_record(&message) {
                    Ok(envelope) => {
                        debug!(
                            topic = %message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            message_type = %envelope.message_type,
                            "Received envelope"
                        );

                        let envelope = Arc::new(envelope);
                        let subscribed = handlers
                            .read()
                            .await
                            .get(message.topic())
                            .cloned()
                            .unwrap_or_default();
                        for handler in subscribed {
                            if let Err(e) = handler.handle(Arc::clone(&envelope)).await {
                                error!(error = %e, "Handler failed");
                            }
                        }
                    }
                    Err(e) => {
                        // Local-only: logged and discarded, never answered.
                        warn!(topic = %message.topic(), error = %e, "Dropping undecodable record");
                    }
                }

                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    error!(error = %e, "Failed to commit offset");
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests;
