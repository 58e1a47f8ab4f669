use async_trait::async_trait;
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions},
    publisher_confirm::Confirmation,
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::delivery::{consume_loop, AmqpDeliverySource};
use super::envelope::MessageEnvelope;
use super::handler::{EventCallback, SchemaValidator};
use super::processor::{FailureSink, MessageProcessor, Outcome};
use super::retry::RetryPolicy;
use super::topology::Topology;
use super::ConsumerError;

/// Settings for an [`EventSubscriber`]
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672)
    pub url: String,
    pub topology: Topology,
    pub retry_policy: RetryPolicy,
    /// Unacknowledged deliveries held per channel
    pub prefetch: u16,
    /// How long `close` waits for in-flight deliveries
    pub shutdown_grace: Duration,
}

impl SubscriberConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            topology: Topology::default(),
            retry_policy: RetryPolicy::default(),
            prefetch: 10,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Publishes failed messages to the retry and dead-letter exchanges
///
/// The channel must be in confirm mode: a publish only counts once the broker
/// has acked it.
pub struct AmqpFailureSink {
    channel: Channel,
    topology: Topology,
}

impl AmqpFailureSink {
    pub fn new(channel: Channel, topology: Topology) -> Self {
        Self { channel, topology }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), ConsumerError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                envelope.payload(),
                envelope.properties(),
            )
            .await
            .map_err(|e| ConsumerError::Publish(format!("Failed to publish to {}: {}", exchange, e)))?;

        let confirmation = confirm.await.map_err(|e| {
            ConsumerError::Publish(format!("Publish confirmation failed on {}: {}", exchange, e))
        })?;
        confirmed(exchange, confirmation)?;

        debug!(exchange = %exchange, routing_key = %routing_key, "Published failed message");
        Ok(())
    }
}

fn confirmed(exchange: &str, confirmation: Confirmation) -> Result<(), ConsumerError> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(ConsumerError::Publish(format!(
            "Broker rejected publish to {}",
            exchange
        ))),
        Confirmation::NotRequested => Err(ConsumerError::Publish(format!(
            "Publish to {} was not confirmed: channel is not in confirm mode",
            exchange
        ))),
    }
}

#[async_trait]
impl FailureSink for AmqpFailureSink {
    async fn publish_retry(
        &self,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), ConsumerError> {
        self.publish(&self.topology.retry_exchange, routing_key, envelope)
            .await
    }

    async fn publish_dead_letter(&self, envelope: &MessageEnvelope) -> Result<(), ConsumerError> {
        self.publish(&self.topology.dead_letter_exchange, "", envelope)
            .await
    }
}

/// Consumes broker events with manual acknowledgment and bounded retries
///
/// Lifecycle: [`connect`](Self::connect) once, then any number of
/// [`subscribe_events`](Self::subscribe_events), then [`close`](Self::close).
/// Broker failures while connecting or subscribing are returned to the caller;
/// a consumption loop that loses its broker stream reports on the receiver
/// from [`failures`](Self::failures).
pub struct EventSubscriber {
    config: SubscriberConfig,
    validator: Arc<dyn SchemaValidator>,
    connection: Option<Connection>,
    channel: Option<Channel>,
    shutdown: watch::Sender<bool>,
    consumers: Vec<JoinHandle<()>>,
    failure_sender: mpsc::UnboundedSender<ConsumerError>,
    failure_receiver: Option<mpsc::UnboundedReceiver<ConsumerError>>,
}

impl EventSubscriber {
    pub fn new(config: SubscriberConfig, validator: Arc<dyn SchemaValidator>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (failure_sender, failure_receiver) = mpsc::unbounded_channel();

        Self {
            config,
            validator,
            connection: None,
            channel: None,
            shutdown,
            consumers: Vec::new(),
            failure_sender,
            failure_receiver: Some(failure_receiver),
        }
    }

    /// Open the connection and channel, then declare exchanges and the
    /// dead-letter queue
    #[instrument(skip(self), fields(url = %self.config.url))]
    pub async fn connect(&mut self) -> Result<(), ConsumerError> {
        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(|e| {
                error!(error = %e, "Error while connecting to RabbitMQ");
                ConsumerError::Connection(format!("Failed to connect: {}", e))
            })?;

        let channel = connection.create_channel().await.map_err(|e| {
            ConsumerError::Connection(format!("Failed to create channel: {}", e))
        })?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| ConsumerError::Connection(format!("Failed to set prefetch: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                ConsumerError::Connection(format!("Failed to enable publisher confirms: {}", e))
            })?;

        let topology = &self.config.topology;
        topology.declare_exchanges(&channel).await?;
        topology.declare_dead_letter_queue(&channel).await?;

        info!(
            exchange = %topology.exchange,
            prefetch = self.config.prefetch,
            "Connected to RabbitMQ"
        );

        self.connection = Some(connection);
        self.channel = Some(channel);
        Ok(())
    }

    /// Declare and bind `queue_name`, then consume it, invoking `callback` once
    /// per valid message
    #[instrument(skip(self, callback), fields(handler = callback.name()))]
    pub async fn subscribe_events(
        &mut self,
        queue_name: &str,
        callback: Arc<dyn EventCallback>,
    ) -> Result<(), ConsumerError> {
        let channel = self.channel.clone().ok_or(ConsumerError::NotConnected)?;

        let result = self.start_consumer(&channel, queue_name, callback).await;
        if let Err(e) = &result {
            error!(queue = %queue_name, error = %e, "Error while subscribing to queue");
        }
        result
    }

    async fn start_consumer(
        &mut self,
        channel: &Channel,
        queue_name: &str,
        callback: Arc<dyn EventCallback>,
    ) -> Result<(), ConsumerError> {
        self.config
            .topology
            .declare_application_queue(channel, queue_name)
            .await?;

        let consumer_tag = format!("bidwire-{}", queue_name);
        let consumer = channel
            .basic_consume(
                queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConsumerError::Subscribe(format!("Failed to start consumer: {}", e)))?;

        let sink = Arc::new(AmqpFailureSink::new(
            channel.clone(),
            self.config.topology.clone(),
        ));
        let processor = Arc::new(MessageProcessor::new(
            queue_name,
            self.config.retry_policy.clone(),
            Arc::clone(&self.validator),
            callback,
            sink,
        ));

        let source = AmqpDeliverySource::new(consumer, channel.clone(), consumer_tag);
        let handle = tokio::spawn(consume_loop(
            source,
            processor,
            self.shutdown.subscribe(),
            self.failure_sender.clone(),
            self.config.shutdown_grace,
        ));
        self.consumers.push(handle);

        info!(queue = %queue_name, "Consuming queue");
        Ok(())
    }

    /// Receiver for fatal consumption-loop failures; available once
    pub fn failures(&mut self) -> Option<mpsc::UnboundedReceiver<ConsumerError>> {
        self.failure_receiver.take()
    }

    /// Cancel every consumer, let in-flight deliveries settle, then close the
    /// channel and the connection. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<(), ConsumerError> {
        let _ = self.shutdown.send(true);

        for handle in self.consumers.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "Consumer task ended abnormally");
            }
        }

        if let Some(channel) = self.channel.take() {
            channel.close(200, "Normal shutdown").await.map_err(|e| {
                error!(error = %e, "Error closing RabbitMQ channel");
                ConsumerError::Close(e.to_string())
            })?;
        }

        if let Some(connection) = self.connection.take() {
            connection.close(200, "Normal shutdown").await.map_err(|e| {
                error!(error = %e, "Error closing RabbitMQ connection");
                ConsumerError::Close(e.to_string())
            })?;
            info!("Connection to RabbitMQ closed");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    struct AcceptAll;

    impl SchemaValidator for AcceptAll {
        fn validate(&self, _payload: &Value) -> Result<(), super::super::ValidationError> {
            Ok(())
        }
    }

    struct NoOp;

    #[async_trait]
    impl EventCallback for NoOp {
        async fn handle(
            &self,
            _payload: Value,
            _request_id: &str,
        ) -> Result<(), super::super::HandlerError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "NoOp"
        }
    }

    #[test]
    fn test_default_config() {
        let config = SubscriberConfig::new("amqp://localhost:5672");
        assert_eq!(config.prefetch, 10);
        assert_eq!(config.retry_policy.max_retries(), 5);
        assert_eq!(config.topology, Topology::default());
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_rejected() {
        let mut subscriber = EventSubscriber::new(
            SubscriberConfig::new("amqp://localhost:5672"),
            Arc::new(AcceptAll),
        );

        let result = subscriber
            .subscribe_events("auction_updates", Arc::new(NoOp))
            .await;

        assert!(matches!(result, Err(ConsumerError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_without_connect_is_noop() {
        let mut subscriber = EventSubscriber::new(
            SubscriberConfig::new("amqp://localhost:5672"),
            Arc::new(AcceptAll),
        );

        assert!(subscriber.close().await.is_ok());
        assert!(subscriber.close().await.is_ok());
    }

    #[test]
    fn test_only_broker_ack_confirms_publish() {
        assert!(confirmed("auction.retry", Confirmation::Ack(None)).is_ok());

        match confirmed("auction.retry", Confirmation::Nack(None)) {
            Err(ConsumerError::Publish(message)) => assert!(message.contains("auction.retry")),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            confirmed("auction.dlx", Confirmation::NotRequested),
            Err(ConsumerError::Publish(_))
        ));
    }

    #[test]
    fn test_failures_receiver_is_taken_once() {
        let mut subscriber = EventSubscriber::new(
            SubscriberConfig::new("amqp://localhost:5672"),
            Arc::new(AcceptAll),
        );

        assert!(subscriber.failures().is_some());
        assert!(subscriber.failures().is_none());
    }
}
