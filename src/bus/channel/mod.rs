//! In-memory channel-based event bus for standalone mode.
//!
//! Uses a tokio broadcast channel for pub/sub within a single process.
//! Each subscription fans envelopes out to a fixed set of ordered lanes
//! (`key % partitions`), mirroring Kafka's per-partition FIFO: one lane
//! handles one envelope at a time, so same-key envelopes are processed in
//! publish order while different keys proceed in parallel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info};

use super::{EventBus, EventHandler, Result};
use crate::envelope::Envelope;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 4096;

struct Subscription {
    topic: String,
    handler: Arc<dyn EventHandler>,
}

/// In-memory event bus using tokio broadcast channels.
pub struct ChannelEventBus {
    sender: broadcast::Sender<Arc<Envelope>>,
    partitions: usize,
    pending: RwLock<Vec<Subscription>>,
    started: RwLock<bool>,
}

impl ChannelEventBus {
    /// Create a new channel event bus with `partitions` ordered lanes per subscription.
    pub fn new(partitions: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let partitions = partitions.max(1);

        info!(partitions, "Channel event bus initialized");

        Self {
            sender,
            partitions,
            pending: RwLock::new(Vec::new()),
            started: RwLock::new(false),
        }
    }

    fn spawn_subscription(&self, subscription: Subscription) {
        let mut receiver = self.sender.subscribe();
        let lanes: Vec<mpsc::UnboundedSender<Arc<Envelope>>> = (0..self.partitions)
            .map(|lane| spawn_lane(lane, subscription.topic.clone(), Arc::clone(&subscription.handler)))
            .collect();
        let topic = subscription.topic;
        let partitions = self.partitions;

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => {
                        if envelope.topic != topic {
                            continue;
                        }
                        let lane = envelope.key as usize % partitions;
                        if lanes[lane].send(envelope).is_err() {
                            error!(topic = %topic, lane, "Lane closed, stopping subscription");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(topic = %topic, skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(topic = %topic, "Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });
    }
}

fn spawn_lane(
    lane: usize,
    topic: String,
    handler: Arc<dyn EventHandler>,
) -> mpsc::UnboundedSender<Arc<Envelope>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<Envelope>>();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            debug!(
                topic = %topic,
                lane,
                key = envelope.key,
                message_type = %envelope.message_type,
                "Received envelope via channel"
            );
            if let Err(e) = handler.handle(envelope).await {
                error!(topic = %topic, lane, error = %e, "Handler failed");
            }
        }
    });
    tx
}

impl Default for ChannelEventBus {
    fn default() -> Self {
        Self::new(8)
    }
}

#[async_trait]
impl EventBus for ChannelEventBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(topic = %envelope.topic, key = envelope.key))]
    async fn publish(&self, envelope: Arc<Envelope>) -> Result<()> {
        // Send to channel (ignore error if no receivers)
        match self.sender.send(envelope) {
            Ok(receiver_count) => {
                debug!(receivers = receiver_count, "Published to channel");
            }
            Err(_) => {
                debug!("No receivers for channel publish");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        let subscription = Subscription {
            topic: topic.to_string(),
            handler,
        };
        if *self.started.read().await {
            self.spawn_subscription(subscription);
        } else {
            self.pending.write().await.push(subscription);
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut started = self.started.write().await;
        if *started {
            return Ok(());
        }
        *started = true;
        for subscription in self.pending.write().await.drain(..) {
            self.spawn_subscription(subscription);
        }
        info!("Channel consumer started");
        Ok(())
    }
}
