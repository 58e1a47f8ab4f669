#![allow(dead_code)] // Test utilities may not all be used in every test

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use bidwire::{
    auction::{AuctionEventRelay, AuctionEventSchema},
    backbone::InMemoryBackbone,
    broadcast::{ConnectionId, RoomBroadcaster},
    consumer::{
        EnvelopeHeaders, EventCallback, MessageEnvelope, MessageProcessor, Outcome, RetryPolicy,
    },
};

use super::mocks::RecordingFailureSink;

pub const QUEUE: &str = "auction_updates";

// ============================================================================
// Room Setup Infrastructure
// ============================================================================

/// A registered client: its room, id and the receiving end of its socket channel
pub struct Viewer {
    pub room_id: String,
    pub connection_id: ConnectionId,
    pub receiver: mpsc::UnboundedReceiver<String>,
}

pub struct TestSetup {
    pub backbone: InMemoryBackbone,
    pub broadcaster: Arc<RoomBroadcaster>,
    viewers: BTreeMap<String, Viewer>,
}

impl TestSetup {
    pub fn viewer_mut(&mut self, name: &str) -> &mut Viewer {
        self.viewers
            .get_mut(name)
            .unwrap_or_else(|| panic!("no viewer named {}", name))
    }

    /// Names of the viewers registered in `room_id`
    pub fn viewers_in(&self, room_id: &str) -> Vec<String> {
        self.viewers
            .iter()
            .filter(|(_, viewer)| viewer.room_id == room_id)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Register another viewer on this setup's broadcaster
    pub async fn join(&mut self, name: &str, room_id: &str) {
        let viewer = connect_viewer(&self.broadcaster, room_id).await;
        self.viewers.insert(name.to_string(), viewer);
    }

    /// Disconnect a viewer, keeping its receiver around for assertions
    pub async fn leave(&mut self, name: &str) {
        let (room_id, connection_id) = {
            let viewer = self.viewer_mut(name);
            (viewer.room_id.clone(), viewer.connection_id)
        };
        self.broadcaster
            .disconnect(&room_id, connection_id)
            .await
            .unwrap();
    }

    /// Drop a viewer's receiver without disconnecting, like a socket task that died
    pub fn abandon(&mut self, name: &str) {
        self.viewers.remove(name);
    }

    pub async fn broadcast(&self, room_id: &str, message: &str) {
        self.broadcaster.broadcast(room_id, message).await.unwrap();
    }

    /// A second broadcaster on the same backbone hub, as another server process
    pub fn replica(&self) -> (InMemoryBackbone, Arc<RoomBroadcaster>) {
        let backbone = self.backbone.replica();
        let broadcaster = Arc::new(RoomBroadcaster::new(Arc::new(backbone.clone())));
        (backbone, broadcaster)
    }
}

pub async fn connect_viewer(broadcaster: &RoomBroadcaster, room_id: &str) -> Viewer {
    let (sender, receiver) = mpsc::unbounded_channel();
    let connection_id = broadcaster.connect(room_id, sender).await.unwrap();
    Viewer {
        room_id: room_id.to_string(),
        connection_id,
        receiver,
    }
}

pub struct TestSetupBuilder {
    rooms: Vec<(String, Vec<String>)>,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self { rooms: vec![] }
    }

    pub fn with_viewers(mut self, room_id: &str, viewers: Vec<&str>) -> Self {
        self.rooms.push((
            room_id.to_string(),
            viewers.into_iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    pub async fn build(self) -> TestSetup {
        let backbone = InMemoryBackbone::new();
        let broadcaster = Arc::new(RoomBroadcaster::new(Arc::new(backbone.clone())));

        let mut viewers = BTreeMap::new();
        for (room_id, names) in self.rooms {
            for name in names {
                viewers.insert(name, connect_viewer(&broadcaster, &room_id).await);
            }
        }

        TestSetup {
            backbone,
            broadcaster,
            viewers,
        }
    }
}

// ============================================================================
// Consumer Pipeline Setup
// ============================================================================

/// Processor wired to a recording failure sink and, by default, the auction relay
pub struct PipelineSetup {
    pub processor: MessageProcessor,
    pub sink: RecordingFailureSink,
    pub policy: RetryPolicy,
    pub rooms: TestSetup,
}

impl PipelineSetup {
    /// Deliver a fresh message with no headers
    pub async fn deliver(&self, body: &str) -> Outcome {
        self.processor
            .process(MessageEnvelope::new(body, EnvelopeHeaders::default()))
            .await
    }

    pub async fn deliver_with_request_id(&self, body: &str, request_id: &str) -> Outcome {
        let headers = EnvelopeHeaders {
            request_id: Some(request_id.to_string()),
            retry_count: 0,
        };
        self.processor
            .process(MessageEnvelope::new(body, headers))
            .await
    }

    /// Redeliver the last retry publish, as the broker would
    pub async fn redeliver_last_retry(&self) -> Outcome {
        let envelope = self
            .sink
            .last_retry()
            .await
            .expect("a retry should have been published");
        self.processor.process(envelope).await
    }
}

pub struct PipelineSetupBuilder {
    max_retries: u32,
    backoff_unit: Duration,
    callback: Option<Arc<dyn EventCallback>>,
    rooms: TestSetupBuilder,
}

impl PipelineSetupBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: 5,
            backoff_unit: Duration::from_millis(1),
            callback: None,
            rooms: TestSetupBuilder::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Replace the auction relay with another callback
    pub fn with_callback(mut self, callback: Arc<dyn EventCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_viewers(mut self, room_id: &str, viewers: Vec<&str>) -> Self {
        self.rooms = self.rooms.with_viewers(room_id, viewers);
        self
    }

    pub async fn build(self) -> PipelineSetup {
        let rooms = self.rooms.build().await;
        let sink = RecordingFailureSink::new();
        let policy = RetryPolicy::new(self.max_retries, self.backoff_unit);
        let callback: Arc<dyn EventCallback> = match self.callback {
            Some(callback) => callback,
            None => Arc::new(AuctionEventRelay::new(Arc::clone(&rooms.broadcaster))),
        };

        let processor = MessageProcessor::new(
            QUEUE,
            policy.clone(),
            Arc::new(AuctionEventSchema),
            callback,
            Arc::new(sink.clone()),
        );

        PipelineSetup {
            processor,
            sink,
            policy,
            rooms,
        }
    }
}
