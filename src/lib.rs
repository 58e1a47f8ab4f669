// Library crate for the bidwire auction event server
// This file exposes the public API for integration tests

pub mod auction;
pub mod auth;
pub mod backbone;
pub mod broadcast;
pub mod config;
pub mod consumer;
pub mod logging;
pub mod shared;
pub mod websockets;

// Re-export commonly used types for easier access in tests
pub use auction::{AuctionEventRelay, AuctionEventSchema};
pub use backbone::{Backbone, BackboneError, InMemoryBackbone, RedisBackbone, Subscription};
pub use broadcast::{BroadcastError, ConnectionId, RoomBroadcaster};
pub use consumer::{EventCallback, EventSubscriber, MessageEnvelope, MessageProcessor, Outcome};
pub use shared::{AppError, AppState};
