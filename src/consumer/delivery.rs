use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicCancelOptions, BasicNackOptions},
    Channel, Consumer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::envelope::MessageEnvelope;
use super::processor::MessageProcessor;
use super::ConsumerError;

/// A received message awaiting acknowledgment
#[async_trait]
pub trait PendingDelivery: Send + Sync + 'static {
    fn envelope(&self) -> MessageEnvelope;

    async fn ack(&self) -> Result<(), ConsumerError>;

    /// Negative acknowledgment asking the broker to redeliver
    async fn requeue(&self) -> Result<(), ConsumerError>;
}

/// Intake side of one queue consumer
#[async_trait]
pub trait DeliverySource: Send + 'static {
    type Delivery: PendingDelivery;

    /// Next delivery; `None` once the broker stream has ended
    async fn next_delivery(&mut self) -> Option<Result<Self::Delivery, ConsumerError>>;

    /// Ask the broker to stop sending deliveries
    async fn cancel(&mut self) -> Result<(), ConsumerError>;
}

#[async_trait]
impl PendingDelivery for Delivery {
    fn envelope(&self) -> MessageEnvelope {
        MessageEnvelope::from_delivery(self)
    }

    async fn ack(&self) -> Result<(), ConsumerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| ConsumerError::Connection(format!("Failed to ack delivery: {}", e)))
    }

    async fn requeue(&self) -> Result<(), ConsumerError> {
        self.acker
            .nack(BasicNackOptions {
                requeue: true,
                ..Default::default()
            })
            .await
            .map_err(|e| ConsumerError::Connection(format!("Failed to nack delivery: {}", e)))
    }
}

/// A lapin consumer together with the channel and tag needed to cancel it
pub struct AmqpDeliverySource {
    consumer: Consumer,
    channel: Channel,
    tag: String,
}

impl AmqpDeliverySource {
    pub fn new(consumer: Consumer, channel: Channel, tag: impl Into<String>) -> Self {
        Self {
            consumer,
            channel,
            tag: tag.into(),
        }
    }
}

#[async_trait]
impl DeliverySource for AmqpDeliverySource {
    type Delivery = Delivery;

    async fn next_delivery(&mut self) -> Option<Result<Delivery, ConsumerError>> {
        self.consumer
            .next()
            .await
            .map(|delivery| delivery.map_err(|e| ConsumerError::Connection(e.to_string())))
    }

    async fn cancel(&mut self) -> Result<(), ConsumerError> {
        self.channel
            .basic_cancel(&self.tag, BasicCancelOptions::default())
            .await
            .map_err(|e| ConsumerError::Close(format!("Failed to cancel {}: {}", self.tag, e)))
    }
}

/// Pull deliveries until shutdown or stream loss, handling each in its own
/// task. Prefetch bounds how many are in flight.
///
/// On shutdown the consumer is cancelled, then in-flight deliveries get
/// `grace` to settle before they are abandoned. Stream loss is reported on
/// `failures`.
pub async fn consume_loop<S: DeliverySource>(
    mut source: S,
    processor: Arc<MessageProcessor>,
    mut shutdown: watch::Receiver<bool>,
    failures: mpsc::UnboundedSender<ConsumerError>,
    grace: Duration,
) {
    let queue = processor.queue().to_string();
    let mut in_flight = JoinSet::new();

    let stopped = loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!(queue = %queue, "Consumer stopping");
                break true;
            }
            delivery = source.next_delivery() => match delivery {
                Some(Ok(delivery)) => {
                    in_flight.spawn(handle_delivery(Arc::clone(&processor), delivery));
                }
                Some(Err(e)) => {
                    error!(queue = %queue, error = %e, "Consumer delivery error");
                    let _ = failures.send(ConsumerError::Connection(format!(
                        "Consumer for {} failed: {}",
                        queue, e
                    )));
                    break false;
                }
                None => {
                    warn!(queue = %queue, "Consumer stream ended");
                    let _ = failures.send(ConsumerError::Connection(format!(
                        "Consumer stream for {} ended",
                        queue
                    )));
                    break false;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(queue = %queue, error = %e, "Delivery task failed");
                }
            }
        }
    };

    if stopped {
        if let Err(e) = source.cancel().await {
            warn!(queue = %queue, error = %e, "Failed to cancel consumer");
        }
    }

    let pending = in_flight.len();
    let drained = tokio::time::timeout(grace, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            queue = %queue,
            pending = pending,
            "Abandoning in-flight deliveries after grace period"
        );
        in_flight.abort_all();
    }
}

async fn handle_delivery<D: PendingDelivery>(processor: Arc<MessageProcessor>, delivery: D) {
    let outcome = processor.process(delivery.envelope()).await;

    let settled = if outcome.acknowledges() {
        delivery.ack().await
    } else {
        delivery.requeue().await
    };

    match settled {
        Ok(()) => debug!(outcome = ?outcome, "Delivery settled"),
        Err(e) => error!(outcome = ?outcome, error = %e, "Failed to settle delivery"),
    }
}
