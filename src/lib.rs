//! # Gala Stream SDK
//!
//! A Rust library for real-time chain-event ingestion from the GalaChain
//! block explorer stream. The SDK turns raw WebSocket block feeds into typed
//! DEX events (swaps, liquidity changes) and wraps the whole pipeline in a
//! resilience layer built for unattended operation.
//!
//! ## Overview
//!
//! The SDK separates the ingestion pipeline from consumer logic. It focuses
//! on:
//!
//! - **Transport**: one WebSocket session at a time with heartbeats and
//!   bounded exponential reconnect
//! - **Decoding**: batch-submit transaction payloads into classified
//!   operations with per-item failure isolation
//! - **Eventing**: a typed event bus with ordered synchronous fan-out
//! - **Resilience**: error categorization with recovery loops, per-dependency
//!   circuit breakers, and pull-based health checks
//!
//! ## Architecture
//!
//! ### Ingestion Layer
//! [`transport`] owns the socket and reconnect policy; [`subscription`]
//! speaks the explorer's subscribe protocol; [`connection`] supervises one
//! connection episode and dispatches frames in arrival order.
//!
//! ### Decoding Layer
//! [`block_decoder`] finds batch-submit actions inside block transactions and
//! [`classifier`] maps each operation to a typed event payload.
//!
//! ### Eventing Layer
//! [`event_bus`] fans events out to subscribers per [`types::events::EventType`];
//! [`watermark`] tracks the last block and transaction seen.
//!
//! ### Resilience Layer
//! [`error_handler`] categorizes failures and drives bounded recovery via
//! [`recovery`] strategies; [`circuit_breaker`] guards named dependencies;
//! [`health`] aggregates liveness probes; [`supervisor`] owns the global
//! panic hook and background-task monitoring.

// Core Types
/// Chain data model and typed pipeline events
pub mod types;

// Ingestion Pipeline
/// WebSocket transport with reconnect policy
pub mod transport;
/// Subscribe protocol and inbound frame parsing
pub mod subscription;
/// Connection supervisor for one stream episode
pub mod connection;
/// Batch-submit transaction decoding
pub mod block_decoder;
/// Operation classification (swap / liquidity / unknown)
pub mod classifier;

// Eventing
/// Typed event bus with ordered synchronous delivery
pub mod event_bus;
/// Block and transaction watermark tracking
pub mod watermark;

// Resilience Layer
/// Error categorization, retry budgets, and recovery loops
pub mod error_handler;
/// Recovery strategies (probe-backed, deferred, non-recoverable)
pub mod recovery;
/// Per-dependency circuit breakers and registry
pub mod circuit_breaker;
/// Pull-based health check aggregation
pub mod health;
/// Global panic hook and background-task monitoring
pub mod supervisor;

// Infrastructure
/// Metrics and observability
pub mod metrics;
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
pub use connection::StreamConnection;
pub use error_handler::{ErrorCategory, ErrorHandler, ErrorSeverity};
pub use event_bus::EventBus;
pub use health::HealthCheckRegistry;
pub use settings::Settings;
pub use supervisor::Supervisor;
pub use types::events::{ChainEvent, EventType};
pub use watermark::WatermarkTracker;
