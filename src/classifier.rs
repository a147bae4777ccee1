//! # Operation Classifier
//!
//! Maps each decoded batch [`Operation`] to a typed variant by `method` and
//! extracts its DTO fields. Classification never fails: unrecognized methods
//! become [`ClassifiedOperation::Unknown`] with the raw dto retained, and
//! missing fields degrade to the `"Unknown"` placeholder.

use crate::types::chain::Operation;
use crate::types::events::EventType;
use log::debug;
use serde::Serialize;
use serde_json::Value;

pub const METHOD_SWAP: &str = "Swap";
pub const METHOD_ADD_LIQUIDITY: &str = "AddLiquidity";
pub const METHOD_REMOVE_LIQUIDITY: &str = "RemoveLiquidity";

/// Placeholder for DTO fields the payload does not carry.
pub const UNKNOWN_FIELD: &str = "Unknown";

/// Trade direction derived from the `zeroForOne` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwapDirection {
    #[serde(rename = "Token0→Token1")]
    Token0ToToken1,
    #[serde(rename = "Token1→Token0")]
    Token1ToToken0,
}

impl SwapDirection {
    pub fn from_zero_for_one(zero_for_one: bool) -> Self {
        if zero_for_one {
            SwapDirection::Token0ToToken1
        } else {
            SwapDirection::Token1ToToken0
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapDirection::Token0ToToken1 => "Token0→Token1",
            SwapDirection::Token1ToToken0 => "Token1→Token0",
        }
    }
}

impl From<SwapDirection> for &'static str {
    fn from(direction: SwapDirection) -> Self {
        direction.as_str()
    }
}

impl std::fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapDetails {
    pub token0: String,
    pub token1: String,
    pub amount: String,
    pub recipient: String,
    pub fee: Option<u64>,
    pub zero_for_one: bool,
    pub direction: SwapDirection,
    pub unique_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddLiquidityDetails {
    pub token0: String,
    pub token1: String,
    pub amount0_desired: String,
    pub amount1_desired: String,
    pub recipient: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveLiquidityDetails {
    pub token0: String,
    pub token1: String,
    pub liquidity: String,
    pub recipient: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownDetails {
    pub method: String,
    pub dto: Value,
    pub unique_id: String,
}

/// A batch operation after classification.
#[derive(Debug, Clone)]
pub enum ClassifiedOperation {
    Swap(SwapDetails),
    AddLiquidity(AddLiquidityDetails),
    RemoveLiquidity(RemoveLiquidityDetails),
    Unknown(UnknownDetails),
}

impl ClassifiedOperation {
    /// The bus event type this operation is published under.
    pub fn event_type(&self) -> EventType {
        match self {
            ClassifiedOperation::Swap(_) => EventType::Swap,
            ClassifiedOperation::AddLiquidity(_) => EventType::AddLiquidity,
            ClassifiedOperation::RemoveLiquidity(_) => EventType::RemoveLiquidity,
            ClassifiedOperation::Unknown(_) => EventType::UnknownOperation,
        }
    }

    /// Serialize the details into an event payload.
    pub fn into_payload(self) -> Value {
        let payload = match self {
            ClassifiedOperation::Swap(d) => serde_json::to_value(d),
            ClassifiedOperation::AddLiquidity(d) => serde_json::to_value(d),
            ClassifiedOperation::RemoveLiquidity(d) => serde_json::to_value(d),
            ClassifiedOperation::Unknown(d) => serde_json::to_value(d),
        };
        payload.unwrap_or(Value::Null)
    }
}

/// Classify one decoded operation. Infallible by contract.
pub fn classify(operation: &Operation) -> ClassifiedOperation {
    let dto = &operation.dto;
    match operation.method.as_str() {
        METHOD_SWAP => ClassifiedOperation::Swap(extract_swap(operation, dto)),
        METHOD_ADD_LIQUIDITY => {
            ClassifiedOperation::AddLiquidity(extract_add_liquidity(operation, dto))
        }
        METHOD_REMOVE_LIQUIDITY => {
            ClassifiedOperation::RemoveLiquidity(extract_remove_liquidity(operation, dto))
        }
        other => {
            debug!(
                "[Classifier] Unrecognized method '{}' (uniqueId: {}), keeping raw dto",
                other, operation.unique_id
            );
            ClassifiedOperation::Unknown(UnknownDetails {
                method: operation.method.clone(),
                dto: dto.clone(),
                unique_id: operation.unique_id.clone(),
            })
        }
    }
}

fn extract_swap(operation: &Operation, dto: &Value) -> SwapDetails {
    let zero_for_one = dto
        .get("zeroForOne")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    SwapDetails {
        token0: token_collection(dto, "token0"),
        token1: token_collection(dto, "token1"),
        amount: string_field(dto, "amount"),
        recipient: string_field(dto, "recipient"),
        fee: dto.get("fee").and_then(Value::as_u64),
        zero_for_one,
        direction: SwapDirection::from_zero_for_one(zero_for_one),
        unique_id: operation.unique_id.clone(),
    }
}

fn extract_add_liquidity(operation: &Operation, dto: &Value) -> AddLiquidityDetails {
    AddLiquidityDetails {
        token0: token_collection(dto, "token0"),
        token1: token_collection(dto, "token1"),
        amount0_desired: string_field(dto, "amount0Desired"),
        amount1_desired: string_field(dto, "amount1Desired"),
        recipient: string_field(dto, "recipient"),
        unique_id: operation.unique_id.clone(),
    }
}

fn extract_remove_liquidity(operation: &Operation, dto: &Value) -> RemoveLiquidityDetails {
    RemoveLiquidityDetails {
        token0: token_collection(dto, "token0"),
        token1: token_collection(dto, "token1"),
        liquidity: string_field(dto, "liquidity"),
        recipient: string_field(dto, "recipient"),
        unique_id: operation.unique_id.clone(),
    }
}

/// Token identity is `dto.<key>.collection` on this chain.
fn token_collection(dto: &Value, key: &str) -> String {
    dto.get(key)
        .and_then(|token| token.get("collection"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_FIELD.to_string())
}

/// String-valued DTO field; numbers keep their textual form.
fn string_field(dto: &Value, key: &str) -> String {
    match dto.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => UNKNOWN_FIELD.to_string(),
    }
}
