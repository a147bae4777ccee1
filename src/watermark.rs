//! Liveness watermarks for the ingestion pipeline.
//!
//! Tracks the highest block number and the most recent transaction hash
//! observed on the feed. The block watermark only moves forward, so
//! out-of-order delivery never makes progress appear to regress. Updates are
//! lock-free; the catch-all frame path calls these on every recognizable
//! payload, independent of full decoding.

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic progress markers shared across the pipeline.
#[derive(Default)]
pub struct WatermarkTracker {
    last_block_number: AtomicU64,
    last_transaction_hash: ArcSwapOption<String>,
}

impl WatermarkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed block number. Lower numbers than the current
    /// watermark are ignored.
    pub fn observe_block(&self, block_number: u64) {
        self.last_block_number
            .fetch_max(block_number, Ordering::AcqRel);
    }

    /// Record the most recently observed transaction hash.
    pub fn observe_transaction(&self, hash: impl Into<String>) {
        let hash = hash.into();
        if !hash.is_empty() {
            self.last_transaction_hash.store(Some(Arc::new(hash)));
        }
    }

    /// Highest block number seen so far; `None` before the first block.
    pub fn last_block_number(&self) -> Option<u64> {
        match self.last_block_number.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn last_transaction_hash(&self) -> Option<String> {
        self.last_transaction_hash
            .load_full()
            .map(|h| h.as_ref().clone())
    }
}
