use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Event, EventPublisher, PublishError};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
struct Channel {
    capacity: usize,
    sender: RwLock<Option<broadcast::Sender<Event>>>,
}

/// In-process pub/sub transport over a tokio broadcast channel
///
/// Must be `connect`ed before publishing or subscribing. `disconnect` closes
/// the channel, which ends every open subscription.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    channel: Arc<Channel>,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            channel: Arc::new(Channel {
                capacity: capacity.max(1),
                sender: RwLock::new(None),
            }),
        }
    }

    /// Open the channel. Connecting twice keeps the existing channel.
    pub async fn connect(&self) {
        let mut sender = self.channel.sender.write().await;
        if sender.is_none() {
            let (tx, _) = broadcast::channel(self.channel.capacity);
            *sender = Some(tx);
            info!(capacity = self.channel.capacity, "Event publisher connected");
        }
    }

    pub async fn disconnect(&self) {
        if self.channel.sender.write().await.take().is_some() {
            info!("Event publisher disconnected");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.channel.sender.read().await.is_some()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.channel
            .sender
            .read()
            .await
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Subscribe to payloads published on `topic` from now on
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, PublishError> {
        let receiver = self.receiver().await?;
        Ok(Subscription {
            topic: topic.to_string(),
            channel: Arc::clone(&self.channel),
            receiver,
            missed: 0,
        })
    }

    async fn receiver(&self) -> Result<broadcast::Receiver<Event>, PublishError> {
        self.channel
            .sender
            .read()
            .await
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(PublishError::NotConnected)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        let sender = self.channel.sender.read().await;
        let tx = sender.as_ref().ok_or(PublishError::NotConnected)?;

        // A send with no receivers is a delivery to nobody, not a failure
        match tx.send(Event::new(topic, payload)) {
            Ok(receivers) => debug!(topic, payload, receivers, "Published event"),
            Err(_) => debug!(topic, payload, "Published event with no subscribers"),
        }
        Ok(())
    }
}

/// Lazy sequence of payloads for one topic
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    channel: Arc<Channel>,
    receiver: broadcast::Receiver<Event>,
    missed: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of events dropped because this subscriber fell behind
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Next payload on this topic; `None` once the publisher disconnects
    pub async fn next(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.topic == self.topic => return Some(event.payload),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "Subscriber lagged, events dropped");
                    self.missed += skipped;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Re-attach at the live position of the channel, discarding anything buffered
    pub async fn restart(&mut self) -> Result<(), PublishError> {
        let sender = self.channel.sender.read().await;
        let tx = sender.as_ref().ok_or(PublishError::NotConnected)?;
        self.receiver = tx.subscribe();
        Ok(())
    }
}
