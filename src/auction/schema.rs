use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::consumer::{SchemaValidator, ValidationError};

/// Event types the auction service publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionEventKind {
    BidPlaced,
    AuctionClosed,
    Outbid,
    AuctionStarted,
}

impl AuctionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionEventKind::BidPlaced => "bid_placed",
            AuctionEventKind::AuctionClosed => "auction_closed",
            AuctionEventKind::Outbid => "outbid",
            AuctionEventKind::AuctionStarted => "auction_started",
        }
    }
}

impl FromStr for AuctionEventKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bid_placed" => Ok(AuctionEventKind::BidPlaced),
            "auction_closed" => Ok(AuctionEventKind::AuctionClosed),
            "outbid" => Ok(AuctionEventKind::Outbid),
            "auction_started" => Ok(AuctionEventKind::AuctionStarted),
            other => Err(ValidationError::UnknownEventType(other.to_string())),
        }
    }
}

impl fmt::Display for AuctionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default validator for messages on the auction queue
///
/// Requires a JSON object with a known `event_type` and a non-empty
/// `auction_id`. Other fields pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuctionEventSchema;

impl AuctionEventSchema {
    /// Event kind and auction id of an already validated payload
    pub fn describe(payload: &Value) -> Result<(AuctionEventKind, &str), ValidationError> {
        let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;

        let kind = object
            .get("event_type")
            .ok_or(ValidationError::MissingField("event_type"))?
            .as_str()
            .ok_or(ValidationError::InvalidField("event_type"))?
            .parse::<AuctionEventKind>()?;

        let auction_id = object
            .get("auction_id")
            .ok_or(ValidationError::MissingField("auction_id"))?
            .as_str()
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::InvalidField("auction_id"))?;

        Ok((kind, auction_id))
    }
}

impl SchemaValidator for AuctionEventSchema {
    fn validate(&self, payload: &Value) -> Result<(), ValidationError> {
        Self::describe(payload).map(|_| ())
    }
}
