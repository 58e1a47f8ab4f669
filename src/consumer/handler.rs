use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::broadcast::BroadcastError;

/// Errors an application callback can report
///
/// Every variant sends the message down the retry/dead-letter path; there is no
/// "skip" outcome, so callbacks should be idempotent.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Validates a decoded payload before it reaches the callback
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, payload: &Value) -> Result<(), ValidationError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("field {0} must be a non-empty string")]
    InvalidField(&'static str),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

/// Application callback invoked once per valid message
///
/// Receives the parsed JSON payload and the request id carried by the message
/// (or generated for it).
#[async_trait]
pub trait EventCallback: Send + Sync {
    async fn handle(&self, payload: Value, request_id: &str) -> Result<(), HandlerError>;

    /// Get a human-readable name for this callback (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Why a single message could not be processed
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Invalid message format: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Schema validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}
