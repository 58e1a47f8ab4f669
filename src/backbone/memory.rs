use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Backbone, BackboneError, Subscription};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// In-process backbone built on tokio broadcast channels
///
/// Handles created with [`InMemoryBackbone::replica`] share the same channels
/// but keep their own subscriptions, which is how tests model several server
/// processes talking through one backbone.
#[derive(Clone)]
pub struct InMemoryBackbone {
    /// Shared hub: channel -> sender
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
    /// This handle's forwarding tasks: channel -> pump
    pumps: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    capacity: usize,
}

impl InMemoryBackbone {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            pumps: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// A new handle on the same hub with an empty subscription table
    pub fn replica(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
            pumps: Arc::new(Mutex::new(HashMap::new())),
            capacity: self.capacity,
        }
    }

    /// Whether this handle currently holds a subscription for `channel`
    pub async fn is_subscribed(&self, channel: &str) -> bool {
        self.pumps.lock().await.contains_key(channel)
    }

    /// Channels this handle is subscribed to, sorted
    pub async fn subscribed_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.pumps.lock().await.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Subscribe to the hub channel, creating it when this is the first receiver
    async fn receiver_for(&self, channel: &str) -> broadcast::Receiver<String> {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(channel) {
            return sender.subscribe();
        }
        drop(channels);

        debug!(channel = %channel, "Creating backbone channel");
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop the hub channel once no handle receives from it
    async fn prune(&self, channel: &str) {
        let mut channels = self.channels.write().await;
        if channels
            .get(channel)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(channel);
            debug!(channel = %channel, "Removed idle backbone channel");
        }
    }
}

impl Default for InMemoryBackbone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backbone for InMemoryBackbone {
    async fn connect(&self) -> Result<(), BackboneError> {
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackboneError> {
        let mut source = self.receiver_for(channel).await;
        let (sender, receiver) = mpsc::unbounded_channel();
        let channel_name = channel.to_string();

        let pump = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if sender.send(message).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            channel = %channel_name,
                            skipped = skipped,
                            "Backbone subscriber lagged, messages dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.pumps.lock().await.insert(channel.to_string(), pump) {
            previous.abort();
        }

        debug!(channel = %channel, "Subscribed to backbone channel");
        Ok(Subscription::new(channel, receiver))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BackboneError> {
        let pump = self.pumps.lock().await.remove(channel);
        if let Some(pump) = pump {
            pump.abort();
            // The pump owns the hub receiver; wait for it to be dropped
            let _ = pump.await;
            debug!(channel = %channel, "Unsubscribed from backbone channel");
            self.prune(channel).await;
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BackboneError> {
        let sender = self.channels.read().await.get(channel).cloned();
        let Some(sender) = sender else {
            debug!(channel = %channel, "Backbone message published with no receivers");
            return Ok(());
        };

        match sender.send(message.to_string()) {
            Ok(receiver_count) => {
                debug!(
                    channel = %channel,
                    receivers = receiver_count,
                    "Backbone message published"
                );
            }
            Err(_) => {
                debug!(channel = %channel, "Backbone message published with no receivers");
            }
        }
        Ok(())
    }
}
