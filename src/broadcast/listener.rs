use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::room::Connections;
use crate::backbone::Subscription;

/// Background task relaying one room's backbone subscription to its connections
pub(crate) struct RoomListener {
    room_id: String,
    connections: Connections,
}

impl RoomListener {
    pub fn new(room_id: String, connections: Connections) -> Self {
        Self {
            room_id,
            connections,
        }
    }

    /// Spawn the listener; it runs until the subscription closes or the handle
    /// is aborted
    pub fn start(self, mut subscription: Subscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(room_id = %self.room_id, "Room listener started");

            while let Some(message) = subscription.receive().await {
                self.fan_out(&message).await;
            }

            warn!(
                room_id = %self.room_id,
                "Room listener ended - subscription closed"
            );
        })
    }

    /// Send `message` to every connection in registration order. A failed send
    /// only skips that connection.
    async fn fan_out(&self, message: &str) -> usize {
        let connections = self.connections.read().await;
        let mut delivered = 0;

        for connection in connections.iter() {
            match connection.sender.send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(
                        room_id = %self.room_id,
                        connection_id = %connection.id,
                        "Failed to deliver message to connection"
                    );
                }
            }
        }

        debug!(
            room_id = %self.room_id,
            delivered = delivered,
            connections = connections.len(),
            "Room message fanned out"
        );

        delivered
    }
}
