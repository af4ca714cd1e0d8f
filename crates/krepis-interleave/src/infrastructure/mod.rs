//! Infrastructure Layer - OS Threads and Parking
//!
//! The domain layer decides who runs next; this layer makes it so by hosting
//! every operation on a real thread and parking all but one.

pub mod runtime;

pub use runtime::{ControlledRuntime, Message, OperationContext, TaskBody};
