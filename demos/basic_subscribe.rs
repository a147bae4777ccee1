//! # Basic Stream Subscription Example
//!
//! This example connects to the GalaChain explorer gateway, subscribes to the
//! block channel, and prints every classified DEX operation as it arrives:
//! - Block boundaries with transaction counts
//! - Swaps with tokens, amount, and direction
//! - Liquidity adds and removals
//!
//! ## Prerequisites
//!
//! - Network access to the gateway, or set `STREAM_WS_URL` to a local one
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example basic_subscribe
//! ```

use anyhow::Result;
use gala_stream_sdk::{
    connection::StreamConnection,
    error_handler::{ErrorCategory, ErrorHandler},
    event_bus::EventBus,
    recovery::{DeferredRecovery, ProbeBackedRecovery, RecoveryStrategy},
    settings::Settings,
    types::events::EventType,
    watermark::WatermarkTracker,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("🚀 Starting basic stream subscription...");

    // 1. Load settings (Config.toml is optional, env vars override)
    let settings = Settings::new()?;
    println!("✅ Settings loaded ({})", settings.stream.url);

    // 2. Error handler with connectivity recovery
    let error_handler = Arc::new(ErrorHandler::new(settings.recovery.policy()));
    let probe: Arc<dyn RecoveryStrategy> = Arc::new(ProbeBackedRecovery::new(
        settings.recovery.pause(),
        settings.recovery.liveness_probe_url.clone(),
        settings.recovery.probe_timeout(),
    ));
    error_handler.register_strategy(ErrorCategory::Network, probe);
    error_handler.register_strategy(
        ErrorCategory::Websocket,
        Arc::new(DeferredRecovery::new("transport reconnect loop")),
    );
    println!("✅ Error handler ready");

    // 3. Register handlers before connecting so no event is missed
    let bus = Arc::new(EventBus::new());
    bus.subscribe(EventType::Block, |event| {
        println!(
            "📦 Block #{} ({} transactions)",
            event.block_number.unwrap_or_default(),
            event.data["transactionCount"]
        );
        Ok(())
    });
    bus.subscribe(EventType::Swap, |event| {
        println!(
            "💱 Swap {} {} / {} (amount {})",
            event.data["direction"], event.data["token0"], event.data["token1"],
            event.data["amount"]
        );
        Ok(())
    });
    bus.subscribe(EventType::AddLiquidity, |event| {
        println!(
            "➕ Liquidity added: {} / {}",
            event.data["token0"], event.data["token1"]
        );
        Ok(())
    });
    bus.subscribe(EventType::RemoveLiquidity, |event| {
        println!(
            "➖ Liquidity removed: {} / {}",
            event.data["token0"], event.data["token1"]
        );
        Ok(())
    });
    println!("✅ Handlers registered ({})", bus.total_handlers());

    // 4. Connect and stream until Ctrl+C
    let watermarks = Arc::new(WatermarkTracker::new());
    let connection = StreamConnection::new(
        settings.stream.clone(),
        Arc::clone(&bus),
        Arc::clone(&watermarks),
        error_handler,
    );
    connection.connect().await?;
    println!("✅ Connected, streaming '{}'\n", settings.stream.channel);

    tokio::signal::ctrl_c().await?;

    println!("\n🛑 Stopping...");
    connection.disconnect().await;
    match watermarks.last_block_number() {
        Some(block) => println!("✅ Done, last block seen: #{}", block),
        None => println!("✅ Done, no blocks seen"),
    }
    Ok(())
}
