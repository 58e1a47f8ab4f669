use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, OnceCell, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use super::listener::RoomListener;
use super::room::{ConnectionId, Room, RoomConnection, RoomSlot};
use crate::backbone::{Backbone, BackboneError};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error(transparent)]
    Backbone(#[from] BackboneError),
}

/// Bridges backbone channels to the live connections of each room
///
/// Per room id it keeps the connections in registration order, one backbone
/// subscription and one listener task. The subscription and listener exist
/// exactly while the room has at least one connection.
pub struct RoomBroadcaster {
    backbone: Arc<dyn Backbone>,
    backbone_ready: OnceCell<()>,
    rooms: RwLock<HashMap<String, Arc<Mutex<RoomSlot>>>>,
}

impl RoomBroadcaster {
    pub fn new(backbone: Arc<dyn Backbone>) -> Self {
        Self {
            backbone,
            backbone_ready: OnceCell::new(),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection under `room_id`
    ///
    /// The first connection of a room subscribes to the backbone channel and
    /// starts the room listener. If that subscription fails the room is not
    /// created and the error is returned.
    #[instrument(skip(self, sender))]
    pub async fn connect(
        &self,
        room_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> Result<ConnectionId, BroadcastError> {
        let connection = RoomConnection {
            id: ConnectionId::new(),
            sender,
        };
        let connection_id = connection.id;

        let (slot, mut guard) = self.lock_slot(room_id).await;

        match guard.room.as_ref() {
            Some(room) => {
                let count = {
                    let mut connections = room.connections.write().await;
                    connections.push(connection);
                    connections.len()
                };
                info!(
                    room_id = %room_id,
                    connection_id = %connection_id,
                    connections = count,
                    "Connection joined room"
                );
            }
            None => match self.open_room(room_id, connection).await {
                Ok(room) => {
                    guard.room = Some(room);
                    info!(
                        room_id = %room_id,
                        connection_id = %connection_id,
                        "Room activated by first connection"
                    );
                }
                Err(e) => {
                    warn!(room_id = %room_id, error = %e, "Failed to activate room");
                    guard.retired = true;
                    self.remove_slot(room_id, &slot).await;
                    return Err(e);
                }
            },
        }

        Ok(connection_id)
    }

    /// Publish `message` on the backbone channel `room_id`
    ///
    /// Local connections are not written directly; they receive the message
    /// back through the room listener like every other replica does.
    pub async fn broadcast(&self, room_id: &str, message: &str) -> Result<(), BroadcastError> {
        self.ensure_backbone().await?;
        self.backbone.publish(room_id, message).await?;
        debug!(room_id = %room_id, "Room broadcast published");
        Ok(())
    }

    /// Remove a connection; the last one out tears the room down
    ///
    /// Teardown cancels the listener, unsubscribes from the backbone and drops
    /// the room record before any other connect on the same room proceeds.
    /// Unknown rooms and connections are ignored.
    #[instrument(skip(self))]
    pub async fn disconnect(
        &self,
        room_id: &str,
        connection_id: ConnectionId,
    ) -> Result<(), BroadcastError> {
        let Some(slot) = self.rooms.read().await.get(room_id).cloned() else {
            debug!(room_id = %room_id, "Disconnect for unknown room");
            return Ok(());
        };

        let mut guard = slot.clone().lock_owned().await;
        if guard.retired {
            return Ok(());
        }

        let remaining = match guard.room.as_ref() {
            Some(room) => {
                let mut connections = room.connections.write().await;
                connections.retain(|connection| connection.id != connection_id);
                connections.len()
            }
            None => return Ok(()),
        };

        info!(
            room_id = %room_id,
            connection_id = %connection_id,
            remaining = remaining,
            "Connection left room"
        );

        if remaining > 0 {
            return Ok(());
        }

        let result = match guard.room.take() {
            Some(room) => self.close_room(room_id, room).await,
            None => Ok(()),
        };
        guard.retired = true;
        self.remove_slot(room_id, &slot).await;

        info!(room_id = %room_id, "Room closed after last disconnect");
        result
    }

    /// True iff the room exists and has at least one connection
    pub async fn has_active_connection(&self, room_id: &str) -> bool {
        self.connection_count(room_id).await > 0
    }

    pub async fn connection_count(&self, room_id: &str) -> usize {
        let Some(slot) = self.rooms.read().await.get(room_id).cloned() else {
            return 0;
        };

        let guard = slot.lock().await;
        let count = match guard.room.as_ref() {
            Some(room) => room.connections.read().await.len(),
            None => 0,
        };
        count
    }

    /// Ids of rooms that currently have connections, sorted
    pub async fn active_rooms(&self) -> Vec<String> {
        let room_ids: Vec<String> = self.rooms.read().await.keys().cloned().collect();

        let mut active = Vec::new();
        for room_id in room_ids {
            if self.has_active_connection(&room_id).await {
                active.push(room_id);
            }
        }
        active.sort();
        active
    }

    /// Tear down every room: cancel listeners and unsubscribe
    pub async fn shutdown(&self) {
        let slots: Vec<(String, Arc<Mutex<RoomSlot>>)> =
            self.rooms.write().await.drain().collect();

        for (room_id, slot) in slots {
            let mut guard = slot.lock().await;
            guard.retired = true;
            if let Some(room) = guard.room.take() {
                if let Err(e) = self.close_room(&room_id, room).await {
                    warn!(room_id = %room_id, error = %e, "Failed to close room during shutdown");
                }
            }
        }

        info!("Room broadcaster shut down");
    }

    async fn ensure_backbone(&self) -> Result<(), BroadcastError> {
        self.backbone_ready
            .get_or_try_init(|| self.backbone.connect())
            .await?;
        Ok(())
    }

    async fn open_room(
        &self,
        room_id: &str,
        first: RoomConnection,
    ) -> Result<Room, BroadcastError> {
        self.ensure_backbone().await?;
        let subscription = self.backbone.subscribe(room_id).await?;

        let connections = Arc::new(RwLock::new(vec![first]));
        let listener =
            RoomListener::new(room_id.to_string(), Arc::clone(&connections)).start(subscription);

        Ok(Room {
            connections,
            listener,
        })
    }

    async fn close_room(&self, room_id: &str, room: Room) -> Result<(), BroadcastError> {
        room.listener.abort();
        if let Err(e) = room.listener.await {
            if !e.is_cancelled() {
                warn!(room_id = %room_id, error = %e, "Room listener ended abnormally");
            }
        }

        self.backbone.unsubscribe(room_id).await?;
        Ok(())
    }

    /// Lock the live slot for `room_id`, creating it if needed
    async fn lock_slot(&self, room_id: &str) -> (Arc<Mutex<RoomSlot>>, OwnedMutexGuard<RoomSlot>) {
        loop {
            let slot = {
                let mut rooms = self.rooms.write().await;
                let slot = rooms.entry(room_id.to_string()).or_default();
                Arc::clone(slot)
            };

            let guard = Arc::clone(&slot).lock_owned().await;
            if !guard.retired {
                return (slot, guard);
            }
        }
    }

    async fn remove_slot(&self, room_id: &str, slot: &Arc<Mutex<RoomSlot>>) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(room_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            rooms.remove(room_id);
        }
    }
}
