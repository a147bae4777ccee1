//! Subscription protocol: the `subscribe` request, closed decoding of inbound
//! JSON envelopes into [`ProtocolEvent`]s, and confirmation tracking for the
//! block channel.

use crate::types::chain::Block;
use crate::watermark::WatermarkTracker;
use log::{info, warn};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const EVENT_BLOCK_BATCH: &str = "block-batch";
pub const EVENT_SUBSCRIBED: &str = "subscribed";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Outbound subscription request for a channel.
pub fn subscribe_request(channel: &str) -> String {
    json!({ "event": "subscribe", "data": channel }).to_string()
}

/// Every inbound text frame maps to exactly one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A batch of blocks, in server order.
    BlockBatch(Vec<Block>),
    /// Subscription confirmation for `channel`.
    Subscribed { channel: Option<String> },
    /// Protocol-level error reported by the server.
    ServerError { message: String },
    /// Server-initiated disconnect notice.
    DisconnectNotice { reason: String },
    /// Known event tag whose payload failed to decode.
    Malformed { event: String, error: String },
    /// Valid JSON with an unknown or missing event tag.
    Unrecognized(Value),
    /// Frame was not JSON at all.
    NotJson,
}

/// Decode one inbound text frame. Total: never fails, never panics.
pub fn parse_frame(raw: &str) -> ProtocolEvent {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => classify_frame(value),
        Err(_) => ProtocolEvent::NotJson,
    }
}

/// Classify an already-parsed envelope. Split out of [`parse_frame`] so the
/// dispatcher can run [`scan_watermarks`] over the value first; a batch whose
/// typed decode fails here has already advanced the watermarks that way.
pub fn classify_frame(value: Value) -> ProtocolEvent {
    let tag = value.get("event").and_then(Value::as_str).unwrap_or("");
    match tag {
        EVENT_BLOCK_BATCH => {
            let payload = value.get("payload").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<Vec<Block>>(payload) {
                Ok(blocks) => ProtocolEvent::BlockBatch(blocks),
                Err(e) => ProtocolEvent::Malformed {
                    event: EVENT_BLOCK_BATCH.to_string(),
                    error: e.to_string(),
                },
            }
        }
        EVENT_SUBSCRIBED => ProtocolEvent::Subscribed {
            channel: value
                .get("channel")
                .or_else(|| value.get("data"))
                .and_then(Value::as_str)
                .map(str::to_string),
        },
        EVENT_ERROR => ProtocolEvent::ServerError {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        },
        EVENT_DISCONNECT => ProtocolEvent::DisconnectNotice {
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("server disconnect")
                .to_string(),
        },
        _ => ProtocolEvent::Unrecognized(value),
    }
}

/// Opportunistic watermark scan over any inbound JSON frame. Block numbers
/// and transaction ids ride at the envelope top level on some server events
/// and inside the payload array on block batches. Independent of the typed
/// decode, so a batch the decoder rejects still advances liveness.
pub fn scan_watermarks(value: &Value, watermarks: &WatermarkTracker) {
    if let Some(n) = value.get("blockNumber").and_then(Value::as_u64) {
        watermarks.observe_block(n);
    }
    if let Some(items) = value.get("payload").and_then(Value::as_array) {
        for item in items {
            if let Some(n) = item.get("blockNumber").and_then(Value::as_u64) {
                watermarks.observe_block(n);
            }
            if let Some(transactions) = item.get("transactions").and_then(Value::as_array) {
                for transaction in transactions {
                    if let Some(id) = transaction.get("id").and_then(Value::as_str) {
                        watermarks.observe_transaction(id);
                    }
                }
            }
        }
    }
}

/// Tracks whether the server acknowledged our channel subscription.
///
/// A missing confirmation is a warning, not an error: some gateway versions
/// never send `subscribed` and stream blocks regardless.
pub struct SubscriptionTracker {
    channel: String,
    requested_at: Mutex<Option<Instant>>,
    confirmed: AtomicBool,
    warned: AtomicBool,
}

impl SubscriptionTracker {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            requested_at: Mutex::new(None),
            confirmed: AtomicBool::new(false),
            warned: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Call after sending the subscribe request. Resets confirmation state so
    /// each (re)connect gets its own window.
    pub fn note_requested(&self) {
        let mut requested = self
            .requested_at
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *requested = Some(Instant::now());
        self.confirmed.store(false, Ordering::Release);
        self.warned.store(false, Ordering::Release);
    }

    pub fn confirm(&self, channel: Option<&str>) {
        self.confirmed.store(true, Ordering::Release);
        info!(
            "✅ [Subscription] Confirmed for channel '{}'",
            channel.unwrap_or(&self.channel)
        );
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::Acquire)
    }

    /// Warn once if the confirmation window elapsed without an ack. Returns
    /// whether the warning fired on this call.
    pub fn warn_if_overdue(&self, window: Duration) -> bool {
        if self.is_confirmed() || self.warned.load(Ordering::Acquire) {
            return false;
        }
        let overdue = {
            let requested = self
                .requested_at
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            matches!(*requested, Some(at) if at.elapsed() >= window)
        };
        if overdue && !self.warned.swap(true, Ordering::AcqRel) {
            warn!(
                "⚠️ [Subscription] No confirmation for channel '{}' after {:?}, continuing unconfirmed",
                self.channel, window
            );
            return true;
        }
        false
    }
}
