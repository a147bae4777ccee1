//! Typed events published on the event bus.
//!
//! Every event the pipeline produces is a [`ChainEvent`] tagged with an
//! [`EventType`]. The tag set is closed: protocol frames that match no named
//! variant land in the `Unclassified` bucket instead of a second wildcard
//! registration mechanism.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dispatch tag for bus events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Socket connected (subscribe request issued).
    Connected,
    /// Socket disconnected, locally or by the server.
    Disconnected,
    /// Transport or protocol-level error.
    ConnectionError,
    /// Generic per-block event, emitted before any operation events.
    Block,
    /// Classified batch operations.
    Swap,
    AddLiquidity,
    RemoveLiquidity,
    UnknownOperation,
    /// Heartbeat traffic.
    Ping,
    Pong,
    /// Default bucket for frames that match no named variant.
    Unclassified,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::Disconnected => "disconnected",
            EventType::ConnectionError => "connection_error",
            EventType::Block => "block",
            EventType::Swap => "swap",
            EventType::AddLiquidity => "add_liquidity",
            EventType::RemoveLiquidity => "remove_liquidity",
            EventType::UnknownOperation => "unknown_operation",
            EventType::Ping => "ping",
            EventType::Pong => "pong",
            EventType::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable event as delivered to handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEvent {
    pub event_type: EventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<String>,
}

impl ChainEvent {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
            block_number: None,
            transaction_hash: None,
        }
    }

    pub fn with_block(mut self, block_number: u64) -> Self {
        self.block_number = Some(block_number);
        self
    }

    pub fn with_transaction(mut self, transaction_hash: impl Into<String>) -> Self {
        self.transaction_hash = Some(transaction_hash.into());
        self
    }
}
