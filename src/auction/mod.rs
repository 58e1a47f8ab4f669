// Auction events: the schema for the consumed queue and the callback that
// relays them to live viewers

pub use relay::AuctionEventRelay;
pub use schema::{AuctionEventKind, AuctionEventSchema};

mod relay;
mod schema;
