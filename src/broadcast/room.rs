use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identity of one live client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A registered connection: id plus the outbound text channel to its socket task
pub(crate) struct RoomConnection {
    pub id: ConnectionId,
    pub sender: mpsc::UnboundedSender<String>,
}

/// Connections of one room in registration order
///
/// Written only by connect/disconnect; the listener only reads.
pub(crate) type Connections = Arc<RwLock<Vec<RoomConnection>>>;

/// An active room: non-empty connections plus the listener draining its
/// subscription
pub(crate) struct Room {
    pub connections: Connections,
    pub listener: JoinHandle<()>,
}

/// Registration slot guarded by the per-room lock
///
/// A slot is retired when its room is torn down and is never reused; a
/// connect that raced the teardown fetches a fresh slot instead.
#[derive(Default)]
pub(crate) struct RoomSlot {
    pub room: Option<Room>,
    pub retired: bool,
}
