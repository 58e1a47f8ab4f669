#![allow(dead_code)] // Test utilities may not all be used in every test

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use bidwire::consumer::{
    ConsumerError, EventCallback, FailureSink, HandlerError, MessageEnvelope,
};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Failure sink that records every republish instead of talking to a broker
#[derive(Clone, Default)]
pub struct RecordingFailureSink {
    retries: Arc<Mutex<Vec<(String, MessageEnvelope)>>>,
    dead_letters: Arc<Mutex<Vec<MessageEnvelope>>>,
}

impl RecordingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// (routing key, envelope) of every retry publish, in order
    pub async fn retries(&self) -> Vec<(String, MessageEnvelope)> {
        self.retries.lock().await.clone()
    }

    pub async fn dead_letters(&self) -> Vec<MessageEnvelope> {
        self.dead_letters.lock().await.clone()
    }

    /// The most recent retry publish, as the broker would redeliver it
    pub async fn last_retry(&self) -> Option<MessageEnvelope> {
        self.retries
            .lock()
            .await
            .last()
            .map(|(_, envelope)| envelope.clone())
    }
}

#[async_trait]
impl FailureSink for RecordingFailureSink {
    async fn publish_retry(
        &self,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), ConsumerError> {
        self.retries
            .lock()
            .await
            .push((routing_key.to_string(), envelope.clone()));
        Ok(())
    }

    async fn publish_dead_letter(&self, envelope: &MessageEnvelope) -> Result<(), ConsumerError> {
        self.dead_letters.lock().await.push(envelope.clone());
        Ok(())
    }
}

/// Callback that fails its first `failures` invocations, then succeeds
pub struct FlakyCallback {
    failures: u32,
    calls: AtomicU32,
    handled: Mutex<Vec<(Value, String)>>,
}

impl FlakyCallback {
    pub fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
            handled: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(u32::MAX)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// (payload, request id) of every successful invocation
    pub async fn handled(&self) -> Vec<(Value, String)> {
        self.handled.lock().await.clone()
    }
}

#[async_trait]
impl EventCallback for FlakyCallback {
    async fn handle(&self, payload: Value, request_id: &str) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(HandlerError::failed(format!("attempt {} failed", call + 1)));
        }

        self.handled
            .lock()
            .await
            .push((payload, request_id.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "FlakyCallback"
    }
}
