/// Chain wire types (blocks, transactions, batch payloads)
pub mod chain;
/// Typed event surface for the event bus
pub mod events;

pub use chain::{Action, BatchPayload, Block, Operation, TraceContext, Transaction};
pub use events::{ChainEvent, EventType};
