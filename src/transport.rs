//! # WebSocket Transport
//!
//! Owns the raw socket: connect with timeout, send the subscription request,
//! pump frames, heartbeat, and reconnect with exponential backoff. Everything
//! above this layer sees only [`TransportEvent`]s on an mpsc channel.
//!
//! ## Features
//!
//! - **Automatic Reconnection**: Exponential backoff between connect attempts,
//!   reset after any session that reached the server
//! - **Bounded Retries**: After the configured attempt budget the task emits
//!   `ReconnectsExhausted` and exits instead of spinning forever
//! - **Heartbeats**: Client Pings on an interval, with Pong latency measured;
//!   server Pings are answered and surfaced
//! - **Breaker Gating**: Optional circuit breaker around connect attempts;
//!   open-circuit rejections count against the reconnect budget
//! - **Clean Shutdown**: A watch signal closes the socket and ends the task

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket-level events forwarded to the connection dispatcher, in order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Socket open and subscription request sent.
    Connected,
    /// Connect attempt failed before the session became usable.
    ConnectError { message: String },
    /// An established session ended.
    Disconnected { reason: String },
    /// Inbound text frame, raw.
    Frame { raw: String },
    /// Server Ping received (already answered with Pong).
    Ping,
    /// Pong received; latency is known when it answers our heartbeat.
    Pong { latency_ms: Option<u64> },
    /// Consecutive connect attempts exhausted; the transport task has exited.
    ReconnectsExhausted { attempts: u32 },
}

/// Transport tuning. Defaults come from [`Settings`](crate::settings::Settings).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    /// Sent as the first text frame of every session.
    pub subscribe_frame: String,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Consecutive failed connect attempts before giving up; 0 = unbounded.
    pub max_reconnect_attempts: u32,
    /// When set, every connect attempt runs under this breaker: dial failures
    /// feed its accounting and an open circuit fast-fails the attempt.
    pub gateway_breaker: Option<Arc<CircuitBreaker>>,
}

/// Spawn the transport task. It runs until shutdown is signalled, the events
/// receiver is dropped, or the reconnect budget is exhausted.
pub fn spawn_transport(
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut delay = config.reconnect_base_delay;
        let mut attempts: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match run_session(&config, &events, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Dropped { reason }) => {
                    warn!("⚠️ [Transport] Connection dropped: {}", reason);
                    // The server was reachable, so the backoff starts over.
                    delay = config.reconnect_base_delay;
                    attempts = 0;
                }
                Err(e) => {
                    error!("❌ [Transport] {}", e);
                }
            }

            attempts += 1;
            if config.max_reconnect_attempts > 0 && attempts >= config.max_reconnect_attempts {
                error!(
                    "🚨 [Transport] Reconnect attempts exhausted ({}), giving up",
                    attempts
                );
                let _ = events
                    .send(TransportEvent::ReconnectsExhausted { attempts })
                    .await;
                break;
            }

            info!(
                "🔄 [Transport] Reconnecting in {:?} (attempt {})",
                delay, attempts
            );
            metrics::increment_ws_reconnects();
            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            delay = (delay * 2).min(config.reconnect_max_delay);
        }

        debug!("[Transport] Task exited");
    })
}

enum SessionEnd {
    /// Shutdown was signalled; no further sessions.
    Shutdown,
    /// The session connected and later ended.
    Dropped { reason: String },
}

/// Open the socket within the timeout. Split out of [`run_session`] so
/// connect attempts can run under the gateway breaker.
async fn dial(url: &str, connect_timeout: Duration) -> Result<WsStream, TransportError> {
    match tokio::time::timeout(connect_timeout, connect_async(url)).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(TransportError::Connect(e.to_string())),
        Err(_) => Err(TransportError::Timeout(connect_timeout)),
    }
}

/// One connect-subscribe-pump cycle. `Err` means the session never became
/// usable (counts toward the reconnect budget).
async fn run_session(
    config: &TransportConfig,
    events: &mpsc::Sender<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, TransportError> {
    info!("🔌 [Transport] Connecting to {}", config.url);

    let dialed: Result<WsStream, TransportError> = match &config.gateway_breaker {
        Some(breaker) => breaker
            .execute(|| async {
                dial(&config.url, config.connect_timeout)
                    .await
                    .map_err(anyhow::Error::new)
            })
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Operation { source } => match source.downcast() {
                    Ok(transport) => transport,
                    Err(source) => TransportError::Connect(source.to_string()),
                },
                rejected => TransportError::Connect(rejected.to_string()),
            }),
        None => dial(&config.url, config.connect_timeout).await,
    };
    let ws = match dialed {
        Ok(ws) => ws,
        Err(e) => {
            let _ = events
                .send(TransportEvent::ConnectError {
                    message: e.to_string(),
                })
                .await;
            return Err(e);
        }
    };

    let (mut sink, mut stream) = ws.split();

    if let Err(e) = sink
        .send(Message::Text(config.subscribe_frame.clone()))
        .await
    {
        let message = format!("subscription send failed: {}", e);
        let _ = events
            .send(TransportEvent::ConnectError {
                message: message.clone(),
            })
            .await;
        return Err(TransportError::Send(message));
    }

    let _ = events.send(TransportEvent::Connected).await;
    info!("✅ [Transport] Connected, subscription request sent");

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await; // first tick resolves immediately
    let mut last_ping: Option<Instant> = None;

    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(raw))) => {
                        let _ = events.send(TransportEvent::Frame { raw }).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                        let _ = events.send(TransportEvent::Ping).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        let latency_ms = last_ping
                            .take()
                            .map(|at| at.elapsed().as_millis() as u64);
                        let _ = events.send(TransportEvent::Pong { latency_ms }).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "connection closed".to_string());
                        let _ = events
                            .send(TransportEvent::Disconnected { reason: reason.clone() })
                            .await;
                        return Ok(SessionEnd::Dropped { reason });
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("[Transport] Ignoring {} byte binary frame", data.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let reason = e.to_string();
                        let _ = events
                            .send(TransportEvent::Disconnected { reason: reason.clone() })
                            .await;
                        return Ok(SessionEnd::Dropped { reason });
                    }
                    None => {
                        let reason = "stream ended".to_string();
                        let _ = events
                            .send(TransportEvent::Disconnected { reason: reason.clone() })
                            .await;
                        return Ok(SessionEnd::Dropped { reason });
                    }
                }
            }
            _ = heartbeat.tick() => {
                last_ping = Some(Instant::now());
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    let reason = format!("heartbeat send failed: {}", e);
                    let _ = events
                        .send(TransportEvent::Disconnected { reason: reason.clone() })
                        .await;
                    return Ok(SessionEnd::Dropped { reason });
                }
                debug!("📡 [Transport] Heartbeat ping sent");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("🛑 [Transport] Shutdown signal received, closing socket");
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to send on socket: {0}")]
    Send(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(url: &str) -> TransportConfig {
        TransportConfig {
            url: url.to_string(),
            subscribe_frame: r#"{"event":"subscribe","data":"blocks"}"#.to_string(),
            connect_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_millis(10),
            reconnect_max_delay: Duration::from_millis(40),
            max_reconnect_attempts: 2,
            gateway_breaker: None,
        }
    }

    #[tokio::test]
    async fn test_connect_failure_emits_error_then_exhaustion() {
        // port 1 is essentially never bound, so connects are refused locally
        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_transport(test_config("ws://127.0.0.1:1"), tx, shutdown_rx);

        let mut saw_connect_error = false;
        let mut saw_exhausted = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
        {
            match event {
                TransportEvent::ConnectError { .. } => saw_connect_error = true,
                TransportEvent::ReconnectsExhausted { attempts } => {
                    assert_eq!(attempts, 2);
                    saw_exhausted = true;
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(saw_connect_error);
        assert!(saw_exhausted);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn test_gateway_breaker_records_failed_dials() {
        use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};

        let breaker = Arc::new(CircuitBreaker::new(
            "explorer-gateway",
            CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        ));
        let mut config = test_config("ws://127.0.0.1:1");
        config.max_reconnect_attempts = 4;
        config.gateway_breaker = Some(Arc::clone(&breaker));

        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_transport(config, tx, shutdown_rx);

        let mut exhausted = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
        {
            if let TransportEvent::ReconnectsExhausted { attempts } = event {
                assert_eq!(attempts, 4);
                exhausted = true;
                break;
            }
        }
        assert!(exhausted);

        // two real dials tripped the breaker, the rest were rejected at it
        assert_eq!(breaker.current_state(), CircuitState::Open);
        let stats = breaker.stats().await;
        assert_eq!(stats.total_failures, 2);
        assert_eq!(stats.rejected_calls, 2);
        assert_eq!(stats.total_calls, 4);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_task() {
        let (tx, _rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut config = test_config("ws://127.0.0.1:1");
        config.max_reconnect_attempts = 0; // unbounded, only shutdown ends it
        config.reconnect_base_delay = Duration::from_millis(50);

        let handle = spawn_transport(config, tx, shutdown_rx);
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("transport task should stop on shutdown")
            .unwrap();
    }
}
