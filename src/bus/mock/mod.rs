//! Mock event bus implementation for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, EventBus, EventHandler, Result};
use crate::envelope::Envelope;

/// Mock event bus for testing.
///
/// Records every published envelope. Subscriptions are not delivered to;
/// tests feed handlers directly.
#[derive(Default)]
pub struct MockEventBus {
    published: RwLock<Vec<Envelope>>,
    fail_on_publish: RwLock<bool>,
    fail_on_type: RwLock<Option<String>>,
    fail_next: RwLock<usize>,
}

impl MockEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Fail publishes of one message type only.
    pub async fn set_fail_on_type(&self, message_type: Option<&str>) {
        *self.fail_on_type.write().await = message_type.map(str::to_string);
    }

    /// Fail the next `count` publishes, then recover.
    pub async fn fail_next(&self, count: usize) {
        *self.fail_next.write().await = count;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn published(&self) -> Vec<Envelope> {
        self.published.read().await.clone()
    }

    /// Envelopes published to `topic`, in publish order.
    pub async fn published_on(&self, topic: &str) -> Vec<Envelope> {
        self.published
            .read()
            .await
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn take_published(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl EventBus for MockEventBus {
    async fn publish(&self, envelope: Arc<Envelope>) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        {
            let mut remaining = self.fail_next.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BusError::Connection("Mock transient publish failure".to_string()));
            }
        }
        if self.fail_on_type.read().await.as_deref() == Some(envelope.message_type.as_str()) {
            return Err(BusError::Publish(format!(
                "Mock publish failure for {}",
                envelope.message_type
            )));
        }
        self.published.write().await.push((*envelope).clone());
        Ok(())
    }

    async fn subscribe(&self, _topic: &str, _handler: Arc<dyn EventHandler>) -> Result<()> {
        Err(BusError::SubscribeNotSupported)
    }
}
