//! Operation Model
//!
//! The minimal description of a schedulable unit of work: identity, what it
//! is about to do, and whether it may run. Every controlled task, actor or
//! thread is represented by exactly one [`Operation`] for its lifetime.

pub mod machine;
pub mod types;

pub use machine::Operation;
pub use types::{
    EventType, OperationId, OperationStatus, OperationTarget, OperationType, ResourceId,
};
