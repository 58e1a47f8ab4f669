use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::envelope::MessageEnvelope;
use super::handler::{EventCallback, HandlerError, ProcessingError, SchemaValidator};
use super::retry::{FailureAction, RetryPolicy};
use super::ConsumerError;

/// Where failed messages are republished
#[async_trait]
pub trait FailureSink: Send + Sync {
    /// Publish to the retry exchange under `routing_key`
    async fn publish_retry(
        &self,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), ConsumerError>;

    /// Publish to the dead-letter exchange
    async fn publish_dead_letter(&self, envelope: &MessageEnvelope) -> Result<(), ConsumerError>;
}

/// Terminal state of one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Callback succeeded
    Acked,
    /// Republished to the retry exchange with `retry_count`
    Retried { retry_count: u32 },
    /// Published to the dead-letter exchange after `retry_count` retries
    DeadLettered { retry_count: u32 },
    /// The failure publish itself failed; hand the delivery back to the broker
    Requeued,
}

impl Outcome {
    /// Whether the original delivery should be acknowledged
    pub fn acknowledges(&self) -> bool {
        !matches!(self, Outcome::Requeued)
    }
}

/// Runs one delivery through validate → dispatch → retry/dead-letter
pub struct MessageProcessor {
    queue: String,
    policy: RetryPolicy,
    validator: Arc<dyn SchemaValidator>,
    callback: Arc<dyn EventCallback>,
    sink: Arc<dyn FailureSink>,
}

impl MessageProcessor {
    pub fn new(
        queue: impl Into<String>,
        policy: RetryPolicy,
        validator: Arc<dyn SchemaValidator>,
        callback: Arc<dyn EventCallback>,
        sink: Arc<dyn FailureSink>,
    ) -> Self {
        Self {
            queue: queue.into(),
            policy,
            validator,
            callback,
            sink,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Process one envelope to a terminal outcome. Never fails: every error is
    /// resolved through the retry or dead-letter path.
    pub async fn process(&self, envelope: MessageEnvelope) -> Outcome {
        let request_id = envelope
            .request_id()
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(
            request_id = %request_id,
            queue = %self.queue,
            retry_count = envelope.retry_count(),
            "Processing message"
        );

        match self.dispatch(&envelope, &request_id).await {
            Ok(()) => Outcome::Acked,
            Err(e) => {
                error!(
                    request_id = %request_id,
                    queue = %self.queue,
                    handler = self.callback.name(),
                    error = %e,
                    "Message processing failed"
                );
                self.handle_failure(&envelope, &request_id).await
            }
        }
    }

    async fn dispatch(
        &self,
        envelope: &MessageEnvelope,
        request_id: &str,
    ) -> Result<(), ProcessingError> {
        let payload: Value = serde_json::from_slice(envelope.payload())?;
        self.validator.validate(&payload)?;

        AssertUnwindSafe(self.callback.handle(payload, request_id))
            .catch_unwind()
            .await
            .map_err(|panic| HandlerError::Panic(panic_message(panic.as_ref())))??;

        Ok(())
    }

    async fn handle_failure(&self, envelope: &MessageEnvelope, request_id: &str) -> Outcome {
        match self.policy.on_failure(envelope.retry_count()) {
            FailureAction::Retry { retry_count, delay } => {
                tokio::time::sleep(delay).await;

                warn!(
                    request_id = %request_id,
                    retry = retry_count,
                    max_retries = self.policy.max_retries(),
                    delay_ms = %delay.as_millis(),
                    "Retrying message"
                );

                let retry = envelope.next_retry(request_id);
                match self.sink.publish_retry(&self.queue, &retry).await {
                    Ok(()) => Outcome::Retried { retry_count },
                    Err(e) => {
                        error!(
                            request_id = %request_id,
                            error = %e,
                            "Failed to publish retry, requeueing original delivery"
                        );
                        Outcome::Requeued
                    }
                }
            }
            FailureAction::DeadLetter { retry_count } => {
                warn!(
                    request_id = %request_id,
                    retries = retry_count,
                    "Message moved to dead-letter queue"
                );

                let dead = envelope.with_request_id(request_id);
                match self.sink.publish_dead_letter(&dead).await {
                    Ok(()) => Outcome::DeadLettered { retry_count },
                    Err(e) => {
                        error!(
                            request_id = %request_id,
                            error = %e,
                            "Failed to publish dead letter, requeueing original delivery"
                        );
                        Outcome::Requeued
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
