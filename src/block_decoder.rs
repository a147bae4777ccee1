//! # Block Decoder
//!
//! Turns raw explorer blocks into bus events. For every block it publishes a
//! generic `Block` event, then walks each transaction's actions looking for
//! the DEX batch-submit tag, decodes the JSON batch payload and publishes one
//! classified event per operation.
//!
//! ## Features
//! - Per-action isolation: a malformed batch payload is skipped and logged,
//!   sibling actions and blocks keep decoding
//! - Watermark updates for every observed block and transaction
//! - Decode counters returned per batch for stats logging

use crate::classifier;
use crate::event_bus::EventBus;
use crate::metrics;
use crate::types::chain::{Action, BatchPayload, Block, Transaction};
use crate::types::events::{ChainEvent, EventType};
use crate::watermark::WatermarkTracker;
use log::{debug, warn};
use serde_json::json;
use std::sync::Arc;

/// Chaincode tag marking a DEX batch-submit action.
pub const BATCH_SUBMIT_TAG: &str = "DexV3Contract:BatchSubmit";

/// Counters for one decoding pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    pub blocks: u64,
    pub transactions: u64,
    pub batch_actions: u64,
    pub operations_emitted: u64,
    pub decode_failures: u64,
    pub empty_batches: u64,
}

impl DecodeSummary {
    fn absorb(&mut self, other: DecodeSummary) {
        self.blocks += other.blocks;
        self.transactions += other.transactions;
        self.batch_actions += other.batch_actions;
        self.operations_emitted += other.operations_emitted;
        self.decode_failures += other.decode_failures;
        self.empty_batches += other.empty_batches;
    }
}

/// Stateless over blocks; shares the bus and watermark tracker with the
/// connection that owns it.
pub struct BlockDecoder {
    bus: Arc<EventBus>,
    watermarks: Arc<WatermarkTracker>,
}

impl BlockDecoder {
    pub fn new(bus: Arc<EventBus>, watermarks: Arc<WatermarkTracker>) -> Self {
        Self { bus, watermarks }
    }

    /// Decode a `block-batch` payload in arrival order.
    pub fn process_batch(&self, blocks: &[Block]) -> DecodeSummary {
        let mut summary = DecodeSummary::default();
        for block in blocks {
            summary.absorb(self.process_block(block));
        }
        summary
    }

    /// Decode a single block. Emits the `Block` event before any operation
    /// events so subscribers see block boundaries first.
    pub fn process_block(&self, block: &Block) -> DecodeSummary {
        let mut summary = DecodeSummary {
            blocks: 1,
            ..DecodeSummary::default()
        };

        self.watermarks.observe_block(block.block_number);
        metrics::increment_blocks_processed();

        let block_event = ChainEvent::new(
            EventType::Block,
            json!({
                "blockNumber": block.block_number,
                "timestamp": block.timestamp.to_rfc3339(),
                "transactionCount": block.transactions.len(),
            }),
        )
        .with_block(block.block_number);
        self.bus.emit(&block_event);

        for transaction in &block.transactions {
            summary.transactions += 1;
            self.watermarks.observe_transaction(&transaction.id);
            summary.absorb(self.process_transaction(block, transaction));
        }

        summary
    }

    fn process_transaction(&self, block: &Block, transaction: &Transaction) -> DecodeSummary {
        let mut summary = DecodeSummary::default();
        for action in &transaction.actions {
            if action.args.first().map(String::as_str) != Some(BATCH_SUBMIT_TAG) {
                continue;
            }
            summary.batch_actions += 1;
            summary.absorb(self.process_batch_action(block, transaction, action));
        }
        summary
    }

    /// Decode one batch-submit action's payload (`args[1]`).
    fn process_batch_action(
        &self,
        block: &Block,
        transaction: &Transaction,
        action: &Action,
    ) -> DecodeSummary {
        let mut summary = DecodeSummary::default();

        let raw = match action.args.get(1) {
            Some(raw) => raw,
            None => {
                warn!(
                    "⚠️ [BlockDecoder] Batch action without payload arg (block {}, tx {})",
                    block.block_number, transaction.id
                );
                summary.decode_failures += 1;
                metrics::increment_decode_failures();
                return summary;
            }
        };

        let payload: BatchPayload = match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "⚠️ [BlockDecoder] Failed to decode batch payload (block {}, tx {}): {}",
                    block.block_number, transaction.id, e
                );
                debug!("[BlockDecoder] Raw payload: {}", raw);
                summary.decode_failures += 1;
                metrics::increment_decode_failures();
                return summary;
            }
        };

        let operations = match payload.operations {
            Some(operations) => operations,
            None => {
                warn!(
                    "⚠️ [BlockDecoder] Batch without operations field (block {}, tx {})",
                    block.block_number, transaction.id
                );
                summary.empty_batches += 1;
                return summary;
            }
        };

        for operation in &operations {
            let classified = classifier::classify(operation);
            let event_type = classified.event_type();
            metrics::increment_operations_decoded(event_type.as_str());
            let event = ChainEvent::new(event_type, classified.into_payload())
                .with_block(block.block_number)
                .with_transaction(transaction.id.clone());
            self.bus.emit(&event);
            summary.operations_emitted += 1;
        }

        summary
    }
}
