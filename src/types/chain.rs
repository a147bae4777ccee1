//! Wire-level chain types as delivered by the block explorer feed.
//!
//! Blocks arrive as JSON inside `block-batch` frames and are decoded into a
//! closed set of structs here. Fields the feed omits degrade to defaults
//! instead of failing the whole batch; anything genuinely malformed is
//! handled at the decode boundary (see `block_decoder`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single block notification from the explorer feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub block_number: u64,
    /// Block timestamp; falls back to arrival time when the feed omits it.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// A transaction within a block, carrying its ordered actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A chaincode action. `args[0]` is the action-type tag; for batch-submit
/// actions `args[1]` holds the JSON-encoded [`BatchPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub args: Vec<String>,
}

/// The nested payload of a batch-submit action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    /// `None` when the key is absent; an absent list is a warning, not an
    /// error, and counts as zero operations.
    pub operations: Option<Vec<Operation>>,
    #[serde(default)]
    pub unique_key: Option<String>,
    #[serde(default)]
    pub trace: Option<TraceContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    #[serde(default)]
    pub trace_id: String,
}

/// One DEX operation inside a batch. `method` selects the classification
/// variant; the raw `dto` is retained verbatim for unknown methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub unique_id: String,
    #[serde(default)]
    pub dto: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_block_decodes_camel_case_wire_shape() {
        let raw = json!({
            "blockNumber": 4210770,
            "timestamp": "2024-11-05T12:30:00Z",
            "transactions": [
                {
                    "id": "tx-abc",
                    "actions": [ { "args": ["DexV3Contract:BatchSubmit", "{}"] } ]
                }
            ]
        });

        let block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.block_number, 4210770);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.transactions[0].id, "tx-abc");
        assert_eq!(
            block.transactions[0].actions[0].args[0],
            "DexV3Contract:BatchSubmit"
        );
    }

    #[test]
    fn test_block_tolerates_missing_timestamp_and_transactions() {
        let block: Block = serde_json::from_value(json!({ "blockNumber": 7 })).unwrap();
        assert_eq!(block.block_number, 7);
        assert!(block.transactions.is_empty());
    }

    #[test]
    fn test_operation_without_unique_id_still_decodes() {
        let op: Operation = serde_json::from_value(json!({
            "method": "Swap",
            "dto": { "amount": "10" }
        }))
        .unwrap();
        assert_eq!(op.method, "Swap");
        assert!(op.unique_id.is_empty());
        assert_eq!(op.dto["amount"], "10");
    }

    #[test]
    fn test_batch_payload_distinguishes_absent_operations() {
        let absent: BatchPayload = serde_json::from_value(json!({ "uniqueKey": "k1" })).unwrap();
        assert!(absent.operations.is_none());

        let empty: BatchPayload =
            serde_json::from_value(json!({ "operations": [] })).unwrap();
        assert_eq!(empty.operations.unwrap().len(), 0);
    }

    #[test]
    fn test_batch_payload_rejects_non_sequence_operations() {
        let res: Result<BatchPayload, _> =
            serde_json::from_value(json!({ "operations": "not-a-list" }));
        assert!(res.is_err());
    }
}
