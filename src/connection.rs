//! # Stream Connection
//!
//! The single owner of one explorer WebSocket connection. Spawns the
//! transport task and a dispatch task that consumes transport events in
//! arrival order, turning frames into bus events through the protocol parser
//! and block decoder.
//!
//! ## Features
//!
//! - **Idempotent lifecycle**: repeated `connect` calls while a connection
//!   episode is live are warnings, not errors; `disconnect` is always safe
//! - **Ordered dispatch**: one consumer task preserves server event order
//!   end to end
//! - **Connection stats**: message/block counters and last-activity
//!   timestamps, snapshot-serializable
//! - **Error routing**: transport and protocol failures become categorized
//!   errors on the shared [`ErrorHandler`]

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::block_decoder::BlockDecoder;
use crate::circuit_breaker::CircuitBreaker;
use crate::error_handler::{ErrorCategory, ErrorHandler, ErrorSeverity};
use crate::event_bus::EventBus;
use crate::metrics;
use crate::settings::StreamSettings;
use crate::subscription::{self, ProtocolEvent, SubscriptionTracker};
use crate::transport::{self, TransportConfig, TransportEvent};
use crate::types::events::{ChainEvent, EventType};
use crate::watermark::WatermarkTracker;

/// Live counters for one connection. All atomic; snapshot via [`snapshot`].
///
/// [`snapshot`]: ConnectionStats::snapshot
#[derive(Default)]
pub struct ConnectionStats {
    connects: AtomicU64,
    messages_received: AtomicU64,
    blocks_received: AtomicU64,
    operations_emitted: AtomicU64,
    decode_failures: AtomicU64,
    pings_received: AtomicU64,
    pongs_received: AtomicU64,
    last_pong_latency_ms: AtomicU64,
    // epoch millis, 0 = never
    connected_at_ms: AtomicI64,
    last_message_at_ms: AtomicI64,
    last_block_at_ms: AtomicI64,
}

impl ConnectionStats {
    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn mark_connected(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        self.connected_at_ms.store(Self::now_ms(), Ordering::Release);
    }

    fn note_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.last_message_at_ms
            .store(Self::now_ms(), Ordering::Release);
    }

    fn note_blocks(&self, count: u64) {
        self.blocks_received.fetch_add(count, Ordering::Relaxed);
        self.last_block_at_ms
            .store(Self::now_ms(), Ordering::Release);
    }

    fn note_operations(&self, emitted: u64, failures: u64) {
        self.operations_emitted.fetch_add(emitted, Ordering::Relaxed);
        self.decode_failures.fetch_add(failures, Ordering::Relaxed);
    }

    fn note_ping(&self) {
        self.pings_received.fetch_add(1, Ordering::Relaxed);
    }

    fn note_pong(&self, latency_ms: Option<u64>) {
        self.pongs_received.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = latency_ms {
            self.last_pong_latency_ms.store(latency, Ordering::Release);
        }
    }

    fn ms_to_timestamp(ms: i64) -> Option<DateTime<Utc>> {
        if ms == 0 {
            None
        } else {
            Utc.timestamp_millis_opt(ms).single()
        }
    }

    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            blocks_received: self.blocks_received.load(Ordering::Relaxed),
            operations_emitted: self.operations_emitted.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            pings_received: self.pings_received.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
            last_pong_latency_ms: self.last_pong_latency_ms.load(Ordering::Relaxed),
            connected_at: Self::ms_to_timestamp(self.connected_at_ms.load(Ordering::Acquire)),
            last_message_at: Self::ms_to_timestamp(
                self.last_message_at_ms.load(Ordering::Acquire),
            ),
            last_block_at: Self::ms_to_timestamp(self.last_block_at_ms.load(Ordering::Acquire)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatsSnapshot {
    pub connects: u64,
    pub messages_received: u64,
    pub blocks_received: u64,
    pub operations_emitted: u64,
    pub decode_failures: u64,
    pub pings_received: u64,
    pub pongs_received: u64,
    pub last_pong_latency_ms: u64,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_block_at: Option<DateTime<Utc>>,
}

pub struct StreamConnection {
    settings: StreamSettings,
    bus: Arc<EventBus>,
    watermarks: Arc<WatermarkTracker>,
    error_handler: Arc<ErrorHandler>,
    tracker: Arc<SubscriptionTracker>,
    stats: Arc<ConnectionStats>,
    gateway_breaker: Option<Arc<CircuitBreaker>>,
    connected: Arc<AtomicBool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamConnection {
    pub fn new(
        settings: StreamSettings,
        bus: Arc<EventBus>,
        watermarks: Arc<WatermarkTracker>,
        error_handler: Arc<ErrorHandler>,
    ) -> Self {
        let tracker = Arc::new(SubscriptionTracker::new(settings.channel.clone()));
        Self {
            settings,
            bus,
            watermarks,
            error_handler,
            tracker,
            stats: Arc::new(ConnectionStats::default()),
            gateway_breaker: None,
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Route the transport's connect attempts through `breaker`. Dial
    /// failures feed its accounting and an open circuit fast-fails
    /// reconnects.
    pub fn with_gateway_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.gateway_breaker = Some(breaker);
        self
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn watermarks(&self) -> Arc<WatermarkTracker> {
        Arc::clone(&self.watermarks)
    }

    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_subscription_confirmed(&self) -> bool {
        self.tracker.is_confirmed()
    }

    /// True while the transport and dispatch tasks of the current episode
    /// are alive. False before `connect` and after `disconnect`.
    pub fn is_running(&self) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        !tasks.is_empty() && tasks.iter().any(|handle| !handle.is_finished())
    }

    /// Start the connection episode: transport task plus ordered dispatch
    /// task. A second call while an episode is live is a no-op.
    pub async fn connect(&self) -> anyhow::Result<()> {
        let parsed = match Url::parse(&self.settings.url) {
            Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => parsed,
            Ok(parsed) => {
                let message = format!("unsupported websocket scheme '{}'", parsed.scheme());
                self.error_handler.handle_error(
                    &message,
                    ErrorCategory::Configuration,
                    ErrorSeverity::Critical,
                    json!({ "url": self.settings.url }),
                );
                anyhow::bail!(message);
            }
            Err(e) => {
                let message = format!("invalid websocket url '{}': {}", self.settings.url, e);
                self.error_handler.handle_error(
                    &message,
                    ErrorCategory::Configuration,
                    ErrorSeverity::Critical,
                    json!({ "url": self.settings.url }),
                );
                anyhow::bail!(message);
            }
        };

        let shutdown_rx = {
            let mut shutdown = self.shutdown.lock().unwrap_or_else(|e| e.into_inner());
            if shutdown.is_some() {
                warn!("⚠️ [StreamConnection] connect() called while already active, ignoring");
                return Ok(());
            }
            let (tx, rx) = watch::channel(false);
            *shutdown = Some(tx);
            rx
        };

        info!(
            "🔌 [StreamConnection] Connecting to {} (channel '{}')",
            parsed, self.settings.channel
        );

        let (event_tx, event_rx) = mpsc::channel(self.settings.event_buffer);
        let transport_config = TransportConfig {
            url: self.settings.url.clone(),
            subscribe_frame: subscription::subscribe_request(&self.settings.channel),
            connect_timeout: Duration::from_secs(self.settings.connect_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.settings.heartbeat_interval_secs),
            reconnect_base_delay: Duration::from_millis(self.settings.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_millis(self.settings.reconnect_max_delay_ms),
            max_reconnect_attempts: self.settings.max_reconnect_attempts,
            gateway_breaker: self.gateway_breaker.clone(),
        };

        let transport_task = transport::spawn_transport(transport_config, event_tx, shutdown_rx);

        let ctx = DispatchContext {
            url: self.settings.url.clone(),
            channel: self.settings.channel.clone(),
            confirmation_window: Duration::from_secs(self.settings.confirmation_window_secs),
            bus: Arc::clone(&self.bus),
            decoder: BlockDecoder::new(Arc::clone(&self.bus), Arc::clone(&self.watermarks)),
            watermarks: Arc::clone(&self.watermarks),
            error_handler: Arc::clone(&self.error_handler),
            tracker: Arc::clone(&self.tracker),
            stats: Arc::clone(&self.stats),
            connected: Arc::clone(&self.connected),
        };
        let dispatch_task = tokio::spawn(run_dispatch(ctx, event_rx));

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(transport_task);
        tasks.push(dispatch_task);
        Ok(())
    }

    /// End the episode: signal shutdown, wait briefly for the tasks, abort
    /// stragglers. Safe to call at any time.
    pub async fn disconnect(&self) {
        let sender = {
            let mut shutdown = self.shutdown.lock().unwrap_or_else(|e| e.into_inner());
            shutdown.take()
        };
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };

        let sender = match sender {
            Some(sender) => sender,
            None => {
                debug!("[StreamConnection] disconnect() with no active connection");
                return;
            }
        };
        let _ = sender.send(true);

        for mut handle in handles {
            if tokio::time::timeout(Duration::from_secs(3), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        self.connected.store(false, Ordering::Release);
        metrics::set_ws_connected(0.0);
        self.bus.emit(&ChainEvent::new(
            EventType::Disconnected,
            json!({ "reason": "client disconnect" }),
        ));
        info!("🛑 [StreamConnection] Disconnected");
    }
}

struct DispatchContext {
    url: String,
    channel: String,
    confirmation_window: Duration,
    bus: Arc<EventBus>,
    decoder: BlockDecoder,
    watermarks: Arc<WatermarkTracker>,
    error_handler: Arc<ErrorHandler>,
    tracker: Arc<SubscriptionTracker>,
    stats: Arc<ConnectionStats>,
    connected: Arc<AtomicBool>,
}

/// Single consumer of transport events. Runs until the transport drops its
/// sender (exhausted or shut down).
async fn run_dispatch(ctx: DispatchContext, mut events: mpsc::Receiver<TransportEvent>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            maybe = events.recv() => match maybe {
                Some(event) => handle_transport_event(&ctx, event),
                None => break,
            },
            _ = ticker.tick() => {
                ctx.tracker.warn_if_overdue(ctx.confirmation_window);
            }
        }
    }
    debug!("[StreamConnection] Dispatch task exited");
}

fn handle_transport_event(ctx: &DispatchContext, event: TransportEvent) {
    match event {
        TransportEvent::Connected => {
            ctx.connected.store(true, Ordering::Release);
            ctx.stats.mark_connected();
            ctx.tracker.note_requested();
            metrics::set_ws_connected(1.0);
            ctx.bus.emit(&ChainEvent::new(
                EventType::Connected,
                json!({ "url": ctx.url, "channel": ctx.channel }),
            ));
        }
        TransportEvent::ConnectError { message } => {
            ctx.bus.emit(&ChainEvent::new(
                EventType::ConnectionError,
                json!({ "message": &message, "phase": "connect" }),
            ));
            ctx.error_handler.handle_error(
                &message,
                ErrorCategory::Websocket,
                ErrorSeverity::High,
                json!({ "url": ctx.url, "phase": "connect" }),
            );
        }
        TransportEvent::Disconnected { reason } => {
            ctx.connected.store(false, Ordering::Release);
            metrics::set_ws_connected(0.0);
            ctx.bus.emit(&ChainEvent::new(
                EventType::Disconnected,
                json!({ "reason": &reason }),
            ));
            ctx.error_handler.handle_error(
                &reason,
                ErrorCategory::Websocket,
                ErrorSeverity::Medium,
                json!({ "url": ctx.url }),
            );
        }
        TransportEvent::Frame { raw } => {
            ctx.stats.note_message();
            handle_frame(ctx, &raw);
        }
        TransportEvent::Ping => {
            ctx.stats.note_ping();
            ctx.bus.emit(&ChainEvent::new(EventType::Ping, json!({})));
        }
        TransportEvent::Pong { latency_ms } => {
            ctx.stats.note_pong(latency_ms);
            if let Some(latency) = latency_ms {
                metrics::record_heartbeat_latency(latency as f64);
            }
            ctx.bus.emit(&ChainEvent::new(
                EventType::Pong,
                json!({ "latencyMs": latency_ms }),
            ));
        }
        TransportEvent::ReconnectsExhausted { attempts } => {
            ctx.connected.store(false, Ordering::Release);
            metrics::set_ws_connected(0.0);
            let message = format!("reconnect attempts exhausted after {}", attempts);
            ctx.bus.emit(&ChainEvent::new(
                EventType::ConnectionError,
                json!({ "message": &message, "phase": "reconnect" }),
            ));
            ctx.error_handler.handle_error(
                &message,
                ErrorCategory::Network,
                ErrorSeverity::High,
                json!({ "url": ctx.url, "attempts": attempts }),
            );
        }
    }
}

fn handle_frame(ctx: &DispatchContext, raw: &str) {
    // Watermark scan first, off the raw envelope: it must see frames the
    // typed decode below rejects.
    let event = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => {
            subscription::scan_watermarks(&value, &ctx.watermarks);
            subscription::classify_frame(value)
        }
        Err(_) => ProtocolEvent::NotJson,
    };

    match event {
        ProtocolEvent::BlockBatch(blocks) => {
            ctx.stats.note_blocks(blocks.len() as u64);
            let summary = ctx.decoder.process_batch(&blocks);
            ctx.stats
                .note_operations(summary.operations_emitted, summary.decode_failures);
            debug!(
                "📡 [StreamConnection] Batch of {} block(s): {} operation(s), {} decode failure(s)",
                summary.blocks, summary.operations_emitted, summary.decode_failures
            );
        }
        ProtocolEvent::Subscribed { channel } => {
            ctx.tracker.confirm(channel.as_deref());
        }
        ProtocolEvent::ServerError { message } => {
            warn!("⚠️ [StreamConnection] Server error frame: {}", message);
            ctx.bus.emit(&ChainEvent::new(
                EventType::ConnectionError,
                json!({ "message": &message, "phase": "server" }),
            ));
            ctx.error_handler.handle_error(
                &message,
                ErrorCategory::Websocket,
                ErrorSeverity::Medium,
                json!({ "url": ctx.url, "phase": "server" }),
            );
        }
        ProtocolEvent::DisconnectNotice { reason } => {
            // the socket close that follows raises the Websocket error; the
            // notice itself is informational
            warn!("⚠️ [StreamConnection] Server disconnect notice: {}", reason);
            ctx.bus.emit(&ChainEvent::new(
                EventType::Disconnected,
                json!({ "reason": reason, "phase": "notice" }),
            ));
        }
        ProtocolEvent::Malformed { event, error } => {
            warn!(
                "⚠️ [StreamConnection] Malformed '{}' frame: {}",
                event, error
            );
            ctx.stats.note_operations(0, 1);
            metrics::increment_decode_failures();
        }
        ProtocolEvent::Unrecognized(value) => {
            debug!(
                "[StreamConnection] Unclassified frame: {}",
                value.get("event").and_then(|e| e.as_str()).unwrap_or("?")
            );
            ctx.bus
                .emit(&ChainEvent::new(EventType::Unclassified, value));
        }
        ProtocolEvent::NotJson => {
            debug!("[StreamConnection] Dropping non-JSON frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::RecoveryPolicy;
    use crate::settings::StreamSettings;

    fn test_settings(url: &str) -> StreamSettings {
        StreamSettings {
            url: url.to_string(),
            ..StreamSettings::default()
        }
    }

    fn test_connection(url: &str) -> StreamConnection {
        StreamConnection::new(
            test_settings(url),
            Arc::new(EventBus::new()),
            Arc::new(WatermarkTracker::new()),
            Arc::new(ErrorHandler::new(RecoveryPolicy::default())),
        )
    }

    #[tokio::test]
    async fn test_invalid_url_is_a_configuration_error() {
        let connection = test_connection("not a url");
        assert!(connection.connect().await.is_err());

        let stats = connection.error_handler.stats();
        assert_eq!(stats.by_category.get("CONFIGURATION"), Some(&1));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_non_websocket_scheme_rejected() {
        let connection = test_connection("https://example.com/ws");
        let err = connection.connect().await.unwrap_err();
        assert!(err.to_string().contains("scheme"));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let connection = test_connection("ws://127.0.0.1:19999");
        connection.disconnect().await;
        connection.disconnect().await;
        assert!(!connection.is_connected());
        assert_eq!(connection.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_second_connect_is_idempotent() {
        // port 1 refuses instantly; the episode still counts as active
        let connection = test_connection("ws://127.0.0.1:1");
        connection.connect().await.unwrap();
        connection.connect().await.unwrap();
        {
            let tasks = connection.tasks.lock().unwrap();
            assert_eq!(tasks.len(), 2); // one transport + one dispatch task
        }
        connection.disconnect().await;
    }

    #[test]
    fn test_stats_snapshot_maps_zero_to_none() {
        let stats = ConnectionStats::default();
        let snapshot = stats.snapshot();
        assert!(snapshot.connected_at.is_none());
        assert!(snapshot.last_message_at.is_none());

        stats.mark_connected();
        stats.note_message();
        stats.note_blocks(3);
        stats.note_operations(5, 1);
        stats.note_pong(Some(12));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connects, 1);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.blocks_received, 3);
        assert_eq!(snapshot.operations_emitted, 5);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.last_pong_latency_ms, 12);
        assert!(snapshot.connected_at.is_some());
        assert!(snapshot.last_block_at.is_some());
    }
}
