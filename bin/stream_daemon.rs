//! # Gala Stream Daemon
//!
//! Standalone ingestion daemon for the GalaChain DEX event stream.
//!
//! ## Overview
//!
//! This service:
//! - Connects to the explorer gateway and subscribes to the block channel
//! - Decodes batch-submit transactions into typed swap/liquidity events
//! - Keeps the pipeline alive with categorized recovery and health checks
//! - Handles graceful shutdown on Ctrl+C
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin stream_daemon -- --config Config.toml
//! ```
//!
//! Press Ctrl+C to stop gracefully.

use anyhow::Result;
use clap::Parser;
use gala_stream_sdk::{
    circuit_breaker::{CircuitBreakerRegistry, CircuitState},
    connection::StreamConnection,
    error_handler::{ErrorCategory, ErrorHandler},
    event_bus::EventBus,
    health::HealthCheckRegistry,
    metrics,
    recovery::{DeferredRecovery, NonRecoverable, ProbeBackedRecovery, RecoveryStrategy},
    settings::Settings,
    supervisor::Supervisor,
    types::events::EventType,
    watermark::WatermarkTracker,
};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(
    name = "stream_daemon",
    version,
    about = "GalaChain DEX event stream ingestion daemon"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "Config.toml")]
    config: String,

    /// Override the stream gateway URL from the config
    #[arg(long)]
    url: Option<String>,

    /// Exit after the first decoded block (smoke-test mode)
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut settings = Settings::from_file(&cli.config)?;
    if let Some(url) = cli.url {
        settings.stream.url = url;
    }

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&settings.log.level),
    )
    .init();

    println!("🚀 Starting Gala Stream Daemon");
    println!("═══════════════════════════════════════════════════════════════════\n");
    println!("✅ 1. Settings loaded ({})", cli.config);

    metrics::describe_metrics();
    #[cfg(feature = "observability")]
    if settings.metrics.enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.metrics.port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        println!("✅    Prometheus exporter listening on {}", addr);
    }

    // 2. Circuit breakers for the external dependencies we call out to
    let breakers = Arc::new(CircuitBreakerRegistry::new(settings.circuit_breaker.config()));
    let gateway_breaker = breakers.register("explorer-gateway");
    let probe_breaker = settings
        .recovery
        .liveness_probe_url
        .is_some()
        .then(|| breakers.register("liveness-probe"));
    println!("✅ 2. Circuit breakers registered: {:?}", breakers.names());

    // 3. Error handler with per-category recovery strategies; liveness
    //    probes dial through their own breaker
    let error_handler = Arc::new(ErrorHandler::new(settings.recovery.policy()));
    let mut probe_strategy = ProbeBackedRecovery::new(
        settings.recovery.pause(),
        settings.recovery.liveness_probe_url.clone(),
        settings.recovery.probe_timeout(),
    );
    if let Some(breaker) = probe_breaker {
        probe_strategy = probe_strategy.with_breaker(breaker);
    }
    let probe: Arc<dyn RecoveryStrategy> = Arc::new(probe_strategy);
    error_handler.register_strategy(ErrorCategory::Network, Arc::clone(&probe));
    error_handler.register_strategy(ErrorCategory::ExternalApi, probe);
    // reconnects are owned by the transport loop, not the recovery engine
    error_handler.register_strategy(
        ErrorCategory::Websocket,
        Arc::new(DeferredRecovery::new("connection supervisor")),
    );
    error_handler.register_strategy(ErrorCategory::Configuration, Arc::new(NonRecoverable));
    error_handler.register_strategy(ErrorCategory::Validation, Arc::new(NonRecoverable));
    println!("✅ 3. Error handler and recovery strategies ready");

    // 4. Event pipeline, with gateway dials running under their breaker
    let bus = Arc::new(EventBus::new());
    let watermarks = Arc::new(WatermarkTracker::new());
    let connection = Arc::new(
        StreamConnection::new(
            settings.stream.clone(),
            Arc::clone(&bus),
            Arc::clone(&watermarks),
            Arc::clone(&error_handler),
        )
        .with_gateway_breaker(gateway_breaker),
    );
    println!("✅ 4. Stream connection constructed ({})", settings.stream.url);

    // 5. Health probes
    let health = Arc::new(HealthCheckRegistry::new());
    {
        let probe_connection = Arc::clone(&connection);
        health.register("websocket_connected", move || {
            Ok(probe_connection.is_connected())
        });
        let probe_connection = Arc::clone(&connection);
        health.register("event_pipeline", move || Ok(probe_connection.is_running()));
        for name in breakers.names() {
            if let Some(breaker) = breakers.get(&name) {
                health.register(format!("breaker_{}", name), move || {
                    Ok(breaker.current_state() != CircuitState::Open)
                });
            }
        }
    }
    println!("✅ 5. Health probes registered ({})", health.probe_count());

    // 6. Supervisor owns the panic hook and background tasks
    let supervisor = Supervisor::new(Arc::clone(&error_handler));
    supervisor.install_panic_hook();
    println!("✅ 6. Supervisor active, panic hook installed");

    // --once: signal on the first block event, chained before connect so the
    // very first batch cannot be missed
    let mut first_block_rx = None;
    if cli.once {
        let (tx, rx) = mpsc::unbounded_channel::<u64>();
        bus.subscribe(EventType::Block, move |event| {
            let _ = tx.send(event.block_number.unwrap_or_default());
            Ok(())
        });
        first_block_rx = Some(rx);
    }

    connection.connect().await?;
    println!("✅ 7. Connected, subscribing to '{}'", settings.stream.channel);

    // Periodic stats, health report, heartbeat, and error-store cleanup
    {
        let stats_connection = Arc::clone(&connection);
        let stats_handler = Arc::clone(&error_handler);
        let stats_health = Arc::clone(&health);
        let stats_watermarks = Arc::clone(&watermarks);
        let stats_breakers = Arc::clone(&breakers);
        let retention = settings.recovery.retention();
        supervisor.spawn_monitored("stats-reporter", async move {
            let mut ticker = interval(STATS_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if stats_handler.is_shutdown() {
                    return Ok(());
                }
                metrics::record_heartbeat();

                let conn = stats_connection.stats();
                let errors = stats_handler.stats();
                info!(
                    "📡 [Daemon] blocks={} messages={} operations={} decode_failures={} last_block={} active_errors={}",
                    conn.blocks_received,
                    conn.messages_received,
                    conn.operations_emitted,
                    conn.decode_failures,
                    stats_watermarks
                        .last_block_number()
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    errors.active,
                );

                let report = stats_health.run_health_checks();
                if !report.healthy {
                    let failing: Vec<&str> = report
                        .checks
                        .iter()
                        .filter(|(_, ok)| !**ok)
                        .map(|(name, _)| name.as_str())
                        .collect();
                    warn!("⚠️ [Daemon] Unhealthy checks: {:?}", failing);
                }
                for stats in stats_breakers.all_stats().await {
                    if stats.state != CircuitState::Closed {
                        warn!(
                            "⚠️ [Daemon] Breaker '{}' is {} ({} rejected)",
                            stats.name, stats.state, stats.rejected_calls
                        );
                    }
                }

                let removed = stats_handler.cleanup(retention);
                if removed > 0 {
                    debug!("[Daemon] Cleaned up {} resolved errors", removed);
                }
            }
        });
    }

    println!("\n💡 Service running:");
    println!("   - Streaming '{}' from {}", settings.stream.channel, settings.stream.url);
    println!("   - Stats report every {}s", STATS_INTERVAL.as_secs());
    if cli.once {
        println!("   - Smoke mode: exiting after first decoded block");
    }
    println!("\nPress Ctrl+C to stop gracefully...\n");

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            println!("\n🛑 Shutdown signal received, stopping tasks...");
        }
        block = wait_first_block(&mut first_block_rx) => {
            println!("\n✅ First block decoded (#{}), exiting (--once)", block);
        }
    }

    supervisor.shutdown(&connection).await;
    println!("✅ Shutdown complete");

    Ok(())
}

/// Resolves with the first observed block number, or never when smoke mode
/// is off.
async fn wait_first_block(rx: &mut Option<mpsc::UnboundedReceiver<u64>>) -> u64 {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(block) => block,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}
