// EventBus - typed fan-out for pipeline events
// One dispatch table keyed by EventType; delivery is synchronous and in
// registration order, and a failing handler never blocks the rest.

use crate::metrics;
use crate::types::events::{ChainEvent, EventType};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Identifier returned by [`EventBus::subscribe`], used to unsubscribe.
/// Closures have no identity in Rust, so registrations are keyed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type EventHandler = Arc<dyn Fn(&ChainEvent) -> anyhow::Result<()> + Send + Sync>;

/// Registry of event-type → ordered handler list.
pub struct EventBus {
    handlers: RwLock<HashMap<EventType, Vec<(HandlerId, EventHandler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Append a handler to the list for `event_type`. Duplicate registrations
    /// of the same closure are permitted; each gets its own id.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(&ChainEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(Uuid::new_v4());
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(
            "[EventBus] Subscribed handler {} to '{}' ({} total)",
            id,
            event_type,
            handlers.get(&event_type).map(|v| v.len()).unwrap_or(0)
        );
        id
    }

    /// Remove the first registration matching `id` under `event_type`.
    /// Returns false when no such registration exists.
    pub fn unsubscribe(&self, event_type: EventType, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = handlers.get_mut(&event_type) {
            if let Some(pos) = list.iter().position(|(hid, _)| *hid == id) {
                list.remove(pos);
                debug!("[EventBus] Unsubscribed handler {} from '{}'", id, event_type);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every handler registered for its type, in
    /// registration order. A handler returning `Err` is logged and skipped;
    /// delivery to the remaining handlers continues. Returns the number of
    /// handlers that received the event.
    ///
    /// Delivery runs against a snapshot of the registration list, so
    /// subscribing or unsubscribing from within a handler affects the next
    /// emit, never the one in flight.
    pub fn emit(&self, event: &ChainEvent) -> usize {
        let snapshot: Vec<(HandlerId, EventHandler)> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers
                .get(&event.event_type)
                .map(|list| list.to_vec())
                .unwrap_or_default()
        };

        if snapshot.is_empty() {
            debug!(
                "[EventBus] No handlers for '{}', event dropped",
                event.event_type
            );
            return 0;
        }

        let mut delivered = 0usize;
        for (id, handler) in &snapshot {
            match handler(event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    metrics::increment_handler_failures(event.event_type.as_str());
                    warn!(
                        "⚠️ [EventBus] Handler {} failed for '{}': {:#}",
                        id, event.event_type, e
                    );
                }
            }
        }

        metrics::increment_events_emitted(event.event_type.as_str());
        delivered
    }

    /// Number of handlers currently registered for `event_type`.
    pub fn handler_count(&self, event_type: EventType) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&event_type).map(|v| v.len()).unwrap_or(0)
    }

    /// Total registrations across all event types.
    pub fn total_handlers(&self) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.values().map(|v| v.len()).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
