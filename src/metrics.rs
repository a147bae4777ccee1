// src/metrics.rs

#[cfg(feature = "observability")]
pub use ::metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

// Macros for metrics when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

// Macros for describe_* functions when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

// Re-export macros for use in this module when observability is disabled
#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    // Liveness / heartbeat
    describe_gauge!("bot_up", "Process liveness (1=up).");
    describe_gauge!(
        "bot_heartbeat_unix_seconds",
        "Last heartbeat timestamp (unix seconds)."
    );

    // --- WebSocket ingestion metrics ---
    describe_gauge!(
        "ws_connected",
        "WebSocket connectivity state (1=connected, 0=disconnected)."
    );
    describe_counter!(
        "ws_reconnects_total",
        Unit::Count,
        "Total WebSocket reconnect attempts."
    );
    describe_histogram!(
        "ws_heartbeat_latency_ms",
        Unit::Milliseconds,
        "Round-trip latency of client heartbeat pings in milliseconds."
    );

    // --- Block pipeline metrics ---
    describe_counter!(
        "chain_blocks_processed_total",
        Unit::Count,
        "Total chain blocks run through the decoder."
    );
    describe_counter!(
        "chain_operations_decoded_total",
        Unit::Count,
        "Total DEX operations decoded from batch transactions, labeled by kind."
    );
    describe_counter!(
        "chain_decode_failures_total",
        Unit::Count,
        "Total payloads that could not be decoded (malformed JSON or frames)."
    );

    // --- Event bus metrics ---
    describe_counter!(
        "bus_events_emitted_total",
        Unit::Count,
        "Total events fanned out on the bus, labeled by event type."
    );
    describe_counter!(
        "bus_handler_failures_total",
        Unit::Count,
        "Total subscriber callbacks that returned an error, labeled by event type."
    );

    // --- Error handling / recovery metrics ---
    describe_counter!(
        "bot_errors_captured_total",
        Unit::Count,
        "Total errors captured by the error handler, labeled by category and severity."
    );
    describe_gauge!(
        "bot_active_errors",
        "Number of unresolved errors currently tracked by the error handler."
    );
    describe_counter!(
        "bot_error_recovery_total",
        Unit::Count,
        "Total recovery loop terminations, labeled by outcome (resolved, abandoned)."
    );

    // --- Circuit breaker metrics ---
    describe_gauge!(
        "bot_circuit_breaker_state",
        "The current state of a circuit breaker, labeled by breaker (0=Closed, 1=Open, 2=HalfOpen)."
    );
    describe_counter!(
        "bot_circuit_breaker_opened_total",
        Unit::Count,
        "Total number of times a circuit breaker has been opened, labeled by breaker."
    );
    describe_counter!(
        "bot_circuit_breaker_rejected_total",
        Unit::Count,
        "Total calls rejected by an open or saturated circuit breaker, labeled by breaker."
    );
}

// --- Helper functions to update metrics ---

pub fn record_heartbeat() {
    // Mark process as up and set last-seen timestamp
    gauge!("bot_up", 1.0);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    gauge!("bot_heartbeat_unix_seconds", ts);
}

pub fn set_ws_connected(state: f64) {
    gauge!("ws_connected", state);
}

pub fn increment_ws_reconnects() {
    increment_counter!("ws_reconnects_total");
}

pub fn record_heartbeat_latency(latency_ms: f64) {
    histogram!("ws_heartbeat_latency_ms", latency_ms);
}

pub fn increment_blocks_processed() {
    increment_counter!("chain_blocks_processed_total");
}

pub fn increment_operations_decoded(kind: &str) {
    counter!("chain_operations_decoded_total", 1, "kind" => kind.to_string());
}

pub fn increment_decode_failures() {
    increment_counter!("chain_decode_failures_total");
}

pub fn increment_events_emitted(event: &str) {
    counter!("bus_events_emitted_total", 1, "event" => event.to_string());
}

pub fn increment_handler_failures(event: &str) {
    counter!("bus_handler_failures_total", 1, "event" => event.to_string());
}

pub fn increment_errors_captured(category: &str, severity: &str) {
    counter!(
        "bot_errors_captured_total",
        1,
        "category" => category.to_string(),
        "severity" => severity.to_string()
    );
}

pub fn set_active_errors(count: f64) {
    gauge!("bot_active_errors", count);
}

pub fn increment_recovery_outcome(outcome: &str) {
    counter!("bot_error_recovery_total", 1, "outcome" => outcome.to_string());
}

pub fn set_circuit_breaker_state(breaker: &str, state: f64) {
    gauge!("bot_circuit_breaker_state", state, "breaker" => breaker.to_string());
}

pub fn increment_circuit_breaker_opened(breaker: &str) {
    counter!("bot_circuit_breaker_opened_total", 1, "breaker" => breaker.to_string());
}

pub fn increment_circuit_breaker_rejected(breaker: &str) {
    counter!("bot_circuit_breaker_rejected_total", 1, "breaker" => breaker.to_string());
}
