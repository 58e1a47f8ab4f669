use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

use super::schema::AuctionEventSchema;
use crate::broadcast::RoomBroadcaster;
use crate::consumer::{EventCallback, HandlerError};

/// Relays consumed auction events to the viewers of the auction's room
pub struct AuctionEventRelay {
    broadcaster: Arc<RoomBroadcaster>,
}

impl AuctionEventRelay {
    pub fn new(broadcaster: Arc<RoomBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl EventCallback for AuctionEventRelay {
    #[instrument(skip(self, payload))]
    async fn handle(&self, payload: Value, request_id: &str) -> Result<(), HandlerError> {
        let (kind, auction_id) = AuctionEventSchema::describe(&payload)
            .map_err(|e| HandlerError::failed(e.to_string()))?;

        self.broadcaster
            .broadcast(auction_id, &payload.to_string())
            .await?;

        info!(
            request_id = %request_id,
            auction_id = %auction_id,
            event_type = %kind,
            "Relayed auction event"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AuctionEventRelay"
    }
}
