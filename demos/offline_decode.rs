//! # Offline Block Decoding Example
//!
//! This example runs the decoding pipeline against a canned `block-batch`
//! frame, with no network involved:
//! - Parses the frame into a protocol event
//! - Decodes the batch into classified bus events
//! - Prints the decode summary and resulting watermarks
//!
//! Useful for inspecting how a captured gateway frame classifies without
//! standing up a connection.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example offline_decode
//! ```

use anyhow::Result;
use gala_stream_sdk::{
    block_decoder::{BlockDecoder, BATCH_SUBMIT_TAG},
    event_bus::EventBus,
    subscription::{parse_frame, ProtocolEvent},
    types::events::EventType,
    watermark::WatermarkTracker,
};
use serde_json::json;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    println!("🚀 Decoding a canned block-batch frame...\n");

    // A frame as the gateway would send it: the batch payload rides inside
    // the action args as a JSON string.
    let batch_payload = json!({
        "operations": [
            {
                "method": "Swap",
                "uniqueId": "swap-demo-1",
                "dto": {
                    "token0": { "collection": "GALA" },
                    "token1": { "collection": "GUSDC" },
                    "amount": "125.5",
                    "recipient": "client|demo",
                    "fee": 3000,
                    "zeroForOne": true
                }
            },
            {
                "method": "AddLiquidity",
                "uniqueId": "al-demo-1",
                "dto": {
                    "token0": { "collection": "GALA" },
                    "token1": { "collection": "GWETH" },
                    "amount0Desired": "50",
                    "amount1Desired": "0.01"
                }
            }
        ]
    })
    .to_string();
    let frame = json!({
        "event": "block-batch",
        "payload": [{
            "blockNumber": 4242,
            "timestamp": "2024-05-01T00:00:00Z",
            "transactions": [{
                "id": "tx-demo-1",
                "actions": [{ "args": [BATCH_SUBMIT_TAG, batch_payload] }]
            }]
        }]
    })
    .to_string();

    // Print everything the decoder classifies.
    let bus = Arc::new(EventBus::new());
    for event_type in [
        EventType::Block,
        EventType::Swap,
        EventType::AddLiquidity,
        EventType::RemoveLiquidity,
        EventType::UnknownOperation,
    ] {
        bus.subscribe(event_type, |event| {
            println!("📨 {}", event.event_type);
            println!("{}\n", serde_json::to_string_pretty(&event.data)?);
            Ok(())
        });
    }

    let watermarks = Arc::new(WatermarkTracker::new());
    let decoder = BlockDecoder::new(Arc::clone(&bus), Arc::clone(&watermarks));

    let summary = match parse_frame(&frame) {
        ProtocolEvent::BlockBatch(blocks) => decoder.process_batch(&blocks),
        other => anyhow::bail!("expected a block batch, parsed {:?}", other),
    };

    println!("✅ Decode summary:");
    println!("   blocks:             {}", summary.blocks);
    println!("   transactions:       {}", summary.transactions);
    println!("   batch actions:      {}", summary.batch_actions);
    println!("   operations emitted: {}", summary.operations_emitted);
    println!("   decode failures:    {}", summary.decode_failures);
    println!("   empty batches:      {}", summary.empty_batches);
    println!(
        "✅ Watermarks: block {:?}, transaction {:?}",
        watermarks.last_block_number(),
        watermarks.last_transaction_hash()
    );
    Ok(())
}
