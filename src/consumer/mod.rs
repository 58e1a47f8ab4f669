// Durable event consumption from the AMQP broker
//
// Deliveries are acknowledged manually. A message that fails to decode,
// validate or process is retried through the retry exchange with exponential
// backoff, then dead-lettered once its retries are exhausted.

use thiserror::Error;

// Public API
pub use delivery::{AmqpDeliverySource, DeliverySource, PendingDelivery};
pub use envelope::{EnvelopeHeaders, MessageEnvelope, REQUEST_ID_HEADER, RETRY_COUNT_HEADER};
pub use handler::{EventCallback, HandlerError, ProcessingError, SchemaValidator, ValidationError};
pub use processor::{FailureSink, MessageProcessor, Outcome};
pub use retry::{FailureAction, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use subscriber::{AmqpFailureSink, EventSubscriber, SubscriberConfig};
pub use topology::Topology;

// Internal modules
mod delivery;
mod envelope;
mod handler;
mod processor;
mod retry;
mod subscriber;
mod topology;

/// Broker-side failures; fatal to the component that hit them
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Topology declaration error: {0}")]
    Topology(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Close error: {0}")]
    Close(String),

    #[error("Not connected: call connect() first")]
    NotConnected,
}
