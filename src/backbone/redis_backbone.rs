use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use futures::StreamExt;
use redis::{aio::ConnectionManager, aio::PubSub, AsyncCommands, Client, Msg};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Backbone, BackboneError, Subscription};

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Redis PUBLISH/SUBSCRIBE backbone
///
/// Publishing goes through one shared `ConnectionManager`, created on first
/// use. All subscriptions share a single Redis pub/sub connection, opened on the
/// first subscribe and owned by one pump task. The pump routes each message by
/// channel name into its [`Subscription`] and takes SUBSCRIBE/UNSUBSCRIBE
/// requests over a command channel. When the Redis stream drops, the pump
/// reconnects with exponential backoff and jitter and re-subscribes every
/// routed channel.
pub struct RedisBackbone {
    client: Client,
    publisher: OnceCell<ConnectionManager>,
    router: OnceCell<Router>,
}

/// Handle on the pump task
struct Router {
    commands: mpsc::UnboundedSender<RouterCommand>,
    pump: JoinHandle<()>,
}

enum RouterCommand {
    Subscribe {
        channel: String,
        sender: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<Result<(), BackboneError>>,
    },
    Unsubscribe {
        channel: String,
        reply: oneshot::Sender<Result<(), BackboneError>>,
    },
}

impl RedisBackbone {
    /// Create a backbone for `url` (e.g. redis://localhost:6379). No I/O happens
    /// until [`Backbone::connect`] or the first publish/subscribe.
    pub fn new(url: &str) -> Result<Self, BackboneError> {
        let client = Client::open(url).map_err(|e| {
            BackboneError::Connection(format!("Invalid Redis URL {}: {}", url, e))
        })?;

        Ok(Self {
            client,
            publisher: OnceCell::new(),
            router: OnceCell::new(),
        })
    }

    async fn publisher(&self) -> Result<ConnectionManager, BackboneError> {
        self.publisher
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| {
                        BackboneError::Connection(format!("Failed to connect to Redis: {}", e))
                    })?;
                info!("Connected to Redis backbone");
                Ok(manager)
            })
            .await
            .cloned()
    }

    async fn router(&self) -> Result<&Router, BackboneError> {
        self.router
            .get_or_try_init(|| async {
                let pubsub = open_pubsub(&self.client, &[]).await?;
                let (commands, receiver) = mpsc::unbounded_channel();
                let pump = tokio::spawn(pump(self.client.clone(), pubsub, receiver));
                info!("Opened shared Redis pub/sub connection");
                Ok(Router { commands, pump })
            })
            .await
    }

    async fn send_command(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<(), BackboneError>>) -> RouterCommand,
    ) -> Result<(), BackboneError> {
        let router = self.router().await?;
        let (reply, response) = oneshot::channel();

        router
            .commands
            .send(command(reply))
            .map_err(|_| BackboneError::Subscribe("Redis pub/sub pump has stopped".to_string()))?;

        response
            .await
            .map_err(|_| BackboneError::Subscribe("Redis pub/sub pump has stopped".to_string()))?
    }
}

/// Channel name -> receiving end of its subscription
#[derive(Default)]
struct ChannelRoutes {
    routes: HashMap<String, mpsc::UnboundedSender<String>>,
}

#[derive(Debug, PartialEq)]
enum Routed {
    Delivered,
    /// Nobody routes this channel (a message racing an UNSUBSCRIBE)
    Unrouted,
    /// The subscription was dropped; the route has been removed
    Closed,
}

impl ChannelRoutes {
    /// Route `channel` to `sender`. Returns true when the channel is new and
    /// still needs a Redis SUBSCRIBE.
    fn insert(&mut self, channel: &str, sender: mpsc::UnboundedSender<String>) -> bool {
        self.routes.insert(channel.to_string(), sender).is_none()
    }

    /// Returns true when the channel was routed and needs a Redis UNSUBSCRIBE
    fn remove(&mut self, channel: &str) -> bool {
        self.routes.remove(channel).is_some()
    }

    fn deliver(&mut self, channel: &str, payload: String) -> Routed {
        let Some(sender) = self.routes.get(channel) else {
            return Routed::Unrouted;
        };

        if sender.send(payload).is_ok() {
            Routed::Delivered
        } else {
            self.routes.remove(channel);
            Routed::Closed
        }
    }

    fn channels(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.routes.len()
    }
}

fn reconnect_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(MAX_RECONNECT_DELAY)
        .with_jitter()
        .without_max_times()
}

async fn open_pubsub(client: &Client, channels: &[String]) -> Result<PubSub, BackboneError> {
    let mut pubsub = client.get_async_pubsub().await.map_err(|e| {
        BackboneError::Subscribe(format!("Failed to open Redis pub/sub connection: {}", e))
    })?;

    for channel in channels {
        pubsub.subscribe(channel).await.map_err(|e| {
            BackboneError::Subscribe(format!("Failed to subscribe to {}: {}", channel, e))
        })?;
    }

    Ok(pubsub)
}

enum PumpEvent {
    Command(Option<RouterCommand>),
    Message(Option<Msg>),
}

/// Owns the shared pub/sub connection until the backbone is dropped
async fn pump(
    client: Client,
    mut pubsub: PubSub,
    mut commands: mpsc::UnboundedReceiver<RouterCommand>,
) {
    let mut routes = ChannelRoutes::default();

    loop {
        let event = {
            let messages = pubsub.on_message();
            tokio::pin!(messages);
            tokio::select! {
                command = commands.recv() => PumpEvent::Command(command),
                message = messages.next() => PumpEvent::Message(message),
            }
        };

        match event {
            PumpEvent::Command(None) => {
                debug!("Backbone dropped, stopping Redis pump");
                return;
            }
            PumpEvent::Command(Some(RouterCommand::Subscribe {
                channel,
                sender,
                reply,
            })) => {
                let mut result = Ok(());
                if routes.insert(&channel, sender) {
                    result = pubsub.subscribe(&channel).await.map_err(|e| {
                        BackboneError::Subscribe(format!(
                            "Failed to subscribe to {}: {}",
                            channel, e
                        ))
                    });
                    if result.is_err() {
                        routes.remove(&channel);
                    }
                }
                let _ = reply.send(result);
            }
            PumpEvent::Command(Some(RouterCommand::Unsubscribe { channel, reply })) => {
                let mut result = Ok(());
                if routes.remove(&channel) {
                    result = pubsub.unsubscribe(&channel).await.map_err(|e| {
                        BackboneError::Subscribe(format!(
                            "Failed to unsubscribe from {}: {}",
                            channel, e
                        ))
                    });
                }
                let _ = reply.send(result);
            }
            PumpEvent::Message(Some(message)) => {
                let channel = message.get_channel_name().to_string();
                let payload = match message.get_payload::<String>() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "Discarding non-text backbone payload");
                        continue;
                    }
                };

                match routes.deliver(&channel, payload) {
                    Routed::Delivered => {}
                    Routed::Unrouted => {
                        debug!(channel = %channel, "Dropping message for unrouted channel");
                    }
                    Routed::Closed => {
                        debug!(channel = %channel, "Subscription dropped, unsubscribing");
                        if let Err(e) = pubsub.unsubscribe(&channel).await {
                            warn!(channel = %channel, error = %e, "Failed to unsubscribe dropped channel");
                        }
                    }
                }
            }
            PumpEvent::Message(None) => {
                warn!(channels = routes.len(), "Redis pub/sub stream ended, reconnecting");
                match reconnect(&client, &mut routes, &mut commands).await {
                    Some(restored) => pubsub = restored,
                    None => return,
                }
            }
        }
    }
}

/// Reopen the pub/sub connection with every routed channel subscribed.
/// Commands received meanwhile only update the routes. Returns None once the
/// backbone is dropped.
async fn reconnect(
    client: &Client,
    routes: &mut ChannelRoutes,
    commands: &mut mpsc::UnboundedReceiver<RouterCommand>,
) -> Option<PubSub> {
    let mut backoff = reconnect_backoff().build();

    loop {
        let delay = backoff.next().unwrap_or(MAX_RECONNECT_DELAY);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command? {
                    RouterCommand::Subscribe { channel, sender, reply } => {
                        routes.insert(&channel, sender);
                        let _ = reply.send(Ok(()));
                    }
                    RouterCommand::Unsubscribe { channel, reply } => {
                        routes.remove(&channel);
                        let _ = reply.send(Ok(()));
                    }
                },
            }
        }

        match open_pubsub(client, &routes.channels()).await {
            Ok(pubsub) => {
                info!(channels = routes.len(), "Redis pub/sub connection restored");
                return Some(pubsub);
            }
            Err(e) => {
                error!(
                    error = %e,
                    backoff_ms = %delay.as_millis(),
                    "Failed to restore Redis pub/sub connection, retrying after backoff"
                );
            }
        }
    }
}

#[async_trait]
impl Backbone for RedisBackbone {
    async fn connect(&self) -> Result<(), BackboneError> {
        self.publisher().await.map(|_| ())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackboneError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let name = channel.to_string();

        self.send_command(|reply| RouterCommand::Subscribe {
            channel: name,
            sender,
            reply,
        })
        .await?;

        info!(channel = %channel, "Subscribed to Redis channel");
        Ok(Subscription::new(channel, receiver))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BackboneError> {
        // Never subscribed on this handle, nothing to undo
        if self.router.get().is_none() {
            return Ok(());
        }

        let name = channel.to_string();
        self.send_command(|reply| RouterCommand::Unsubscribe {
            channel: name,
            reply,
        })
        .await?;

        info!(channel = %channel, "Unsubscribed from Redis channel");
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), BackboneError> {
        let mut conn = self.publisher().await?;

        let receivers: i64 = conn.publish(channel, message).await.map_err(|e| {
            BackboneError::Publish(format!("Failed to publish to {}: {}", channel, e))
        })?;

        debug!(channel = %channel, receivers = receivers, "Published to Redis channel");
        Ok(())
    }
}

impl Drop for RedisBackbone {
    fn drop(&mut self) {
        if let Some(router) = self.router.get() {
            router.pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_redis_url_without_connecting() {
        assert!(RedisBackbone::new("redis://127.0.0.1:6379").is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let result = RedisBackbone::new("not a url");
        assert!(matches!(result, Err(BackboneError::Connection(_))));
    }

    #[tokio::test]
    async fn test_unsubscribe_before_any_subscription_skips_redis() {
        // Nothing listens on this port; touching Redis would fail
        let backbone = RedisBackbone::new("redis://127.0.0.1:1").unwrap();
        assert!(backbone.unsubscribe("auction-1").await.is_ok());
    }

    #[test]
    fn test_routes_deliver_by_channel_name() {
        let mut routes = ChannelRoutes::default();
        let (first, mut first_rx) = mpsc::unbounded_channel();
        let (second, mut second_rx) = mpsc::unbounded_channel();

        assert!(routes.insert("auction-1", first));
        assert!(routes.insert("auction-2", second));

        assert_eq!(routes.deliver("auction-2", "SOLD".to_string()), Routed::Delivered);
        assert_eq!(second_rx.try_recv().ok().as_deref(), Some("SOLD"));
        assert!(first_rx.try_recv().is_err());

        assert_eq!(routes.deliver("auction-9", "BID".to_string()), Routed::Unrouted);
    }

    #[test]
    fn test_routes_only_subscribe_new_channels() {
        let mut routes = ChannelRoutes::default();
        let (old, mut old_rx) = mpsc::unbounded_channel();
        let (new, mut new_rx) = mpsc::unbounded_channel();

        assert!(routes.insert("auction-1", old));
        // Replacing the subscription keeps the Redis SUBSCRIBE in place
        assert!(!routes.insert("auction-1", new));
        assert_eq!(routes.len(), 1);

        routes.deliver("auction-1", "BID 5".to_string());
        assert_eq!(new_rx.try_recv().ok().as_deref(), Some("BID 5"));
        assert!(old_rx.try_recv().is_err());

        assert!(routes.remove("auction-1"));
        assert!(!routes.remove("auction-1"));
        assert!(routes.channels().is_empty());
    }

    #[test]
    fn test_routes_drop_closed_subscriptions() {
        let mut routes = ChannelRoutes::default();
        let (sender, receiver) = mpsc::unbounded_channel();
        routes.insert("auction-1", sender);
        drop(receiver);

        assert_eq!(routes.deliver("auction-1", "SOLD".to_string()), Routed::Closed);
        assert_eq!(routes.len(), 0);
    }

    #[test]
    fn test_reconnect_backoff_keeps_growing_past_three_attempts() {
        let delays: Vec<Duration> = reconnect_backoff().build().take(8).collect();

        assert_eq!(delays.len(), 8);
        assert!(delays[0] >= Duration::from_millis(100));
        // Jitter adds at most one extra delay on top of the exponential step
        assert!(delays[4] >= Duration::from_millis(1600));
    }
}
