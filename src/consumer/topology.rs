use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};
use tracing::info;

use super::ConsumerError;

pub const DEFAULT_EXCHANGE: &str = "auction_events";
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "auction_events.dlx";
pub const DEFAULT_RETRY_EXCHANGE: &str = "retry_exchange";
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "dead_letter_queue";

/// Exchange and queue layout shared by every subscriber
///
/// Application queues dead-letter into the same exchange the failure path
/// publishes to, so broker-side expiry and exhausted retries end up in one
/// dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Fanout exchange carrying live events
    pub exchange: String,
    /// Fanout exchange for quarantined messages
    pub dead_letter_exchange: String,
    /// Direct exchange carrying retries, routed by queue name
    pub retry_exchange: String,
    pub dead_letter_queue: String,
    pub message_ttl_ms: u32,
    pub max_length: u32,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            exchange: DEFAULT_EXCHANGE.to_string(),
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_string(),
            retry_exchange: DEFAULT_RETRY_EXCHANGE.to_string(),
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
            message_ttl_ms: 300_000,
            max_length: 1000,
        }
    }
}

impl Topology {
    /// Arguments for an application queue: TTL, length cap, dead-letter target
    pub fn queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt(i64::from(self.message_ttl_ms)),
        );
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.dead_letter_exchange.clone().into()),
        );
        arguments.insert(
            "x-max-length".into(),
            AMQPValue::LongLongInt(i64::from(self.max_length)),
        );
        arguments
    }

    pub fn dead_letter_queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt(i64::from(self.message_ttl_ms)),
        );
        arguments
    }

    /// Declare main, dead-letter and retry exchanges
    pub async fn declare_exchanges(&self, channel: &Channel) -> Result<(), ConsumerError> {
        let exchanges = [
            (&self.exchange, ExchangeKind::Fanout),
            (&self.dead_letter_exchange, ExchangeKind::Fanout),
            (&self.retry_exchange, ExchangeKind::Direct),
        ];

        for (name, kind) in exchanges {
            channel
                .exchange_declare(
                    name,
                    kind,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    ConsumerError::Topology(format!("Failed to declare exchange {}: {}", name, e))
                })?;
        }

        info!(
            exchange = %self.exchange,
            dead_letter_exchange = %self.dead_letter_exchange,
            retry_exchange = %self.retry_exchange,
            "Declared exchanges"
        );
        Ok(())
    }

    /// Declare the dead-letter queue and bind it to the dead-letter exchange
    pub async fn declare_dead_letter_queue(&self, channel: &Channel) -> Result<(), ConsumerError> {
        channel
            .queue_declare(
                &self.dead_letter_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                self.dead_letter_queue_arguments(),
            )
            .await
            .map_err(|e| {
                ConsumerError::Topology(format!("Failed to declare dead-letter queue: {}", e))
            })?;

        channel
            .queue_bind(
                &self.dead_letter_queue,
                &self.dead_letter_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ConsumerError::Topology(format!("Failed to bind dead-letter queue: {}", e))
            })?;

        info!(queue = %self.dead_letter_queue, "Declared dead-letter queue");
        Ok(())
    }

    /// Declare an application queue, bind it to the main exchange, and bind it
    /// to the retry exchange under its own name so retries return only here
    pub async fn declare_application_queue(
        &self,
        channel: &Channel,
        queue: &str,
    ) -> Result<(), ConsumerError> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                self.queue_arguments(),
            )
            .await
            .map_err(|e| {
                ConsumerError::Subscribe(format!("Failed to declare queue {}: {}", queue, e))
            })?;

        channel
            .queue_bind(
                queue,
                &self.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ConsumerError::Subscribe(format!("Failed to bind queue {}: {}", queue, e))
            })?;

        channel
            .queue_bind(
                queue,
                &self.retry_exchange,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ConsumerError::Subscribe(format!(
                    "Failed to bind queue {} to retry exchange: {}",
                    queue, e
                ))
            })?;

        info!(queue = %queue, exchange = %self.exchange, "Bound queue to exchange");
        Ok(())
    }
}
