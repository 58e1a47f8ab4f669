// Public API
pub use broadcaster::{BroadcastError, RoomBroadcaster};
pub use room::ConnectionId;

// Internal modules
mod broadcaster;
mod listener;
mod room;
