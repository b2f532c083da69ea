// Event publishing - best-effort broadcast of stage transitions to observers

pub mod broadcast;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::broadcast::{BroadcastPublisher, Subscription};

/// Topic used when configuration does not name one
pub const DEFAULT_TOPIC: &str = "fabcell/process";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub payload: String,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Event publisher is not connected")]
    NotConnected,
    #[error("Event transport rejected publish on '{topic}': {reason}")]
    Rejected { topic: String, reason: String },
}

/// Fire-and-forget publication of events on a topic
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}
