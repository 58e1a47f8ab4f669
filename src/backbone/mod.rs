// Publish/subscribe backbone shared by every broadcaster replica
//
// Channels are addressed by name (the auction id). Messages are plain UTF-8
// text; the backbone does not look inside them.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// Public API
pub use memory::InMemoryBackbone;
pub use redis_backbone::RedisBackbone;

// Internal modules
mod memory;
mod redis_backbone;

#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("Backbone connection error: {0}")]
    Connection(String),

    #[error("Backbone subscribe error: {0}")]
    Subscribe(String),

    #[error("Backbone publish error: {0}")]
    Publish(String),
}

/// Receiving end of one channel subscription
///
/// Yields messages in the order the backbone delivered them. Once the channel
/// is unsubscribed the subscription drains and then returns `None`.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message (None once the subscription is closed)
    pub async fn receive(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Next pending message, without waiting
    pub fn try_receive(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

/// Addressable channel abstraction over a shared messaging service
#[async_trait]
pub trait Backbone: Send + Sync {
    /// Establish the shared connection. Safe to call more than once.
    async fn connect(&self) -> Result<(), BackboneError>;

    /// Start receiving messages published to `channel`
    ///
    /// A backbone handle holds at most one subscription per channel; subscribing
    /// again replaces the previous one.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackboneError>;

    /// Stop receiving messages for `channel`. Unknown channels are ignored.
    async fn unsubscribe(&self, channel: &str) -> Result<(), BackboneError>;

    /// Fire-and-forget publish; no delivery acknowledgment
    async fn publish(&self, channel: &str, message: &str) -> Result<(), BackboneError>;
}
