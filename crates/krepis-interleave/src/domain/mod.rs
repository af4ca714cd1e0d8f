//! Domain Layer - Scheduling Without Threads
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Domain Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  Operation Module              Random Module                │
//! │  ├─ Operation                  ├─ RandomNumberGenerator     │
//! │  ├─ OperationStatus            └─ DefaultRandomNumber-      │
//! │  └─ OperationType / Target        Generator (ChaCha8)       │
//! │                                                             │
//! │  State Module                  Monitor Module               │
//! │  ├─ AbstractionLevel           ├─ MonitorRegistry           │
//! │  ├─ HashedState                └─ LivenessViolation         │
//! │  └─ StateCoverage                                           │
//! │                                                             │
//! │                   Strategy Module                           │
//! │                   ├─ SchedulingStrategy (trait)             │
//! │                   ├─ Strategy (tagged composition)          │
//! │                   └─ Random, PCT, DPOR, ...                 │
//! │                                                             │
//! │                   Scheduler Module                          │
//! │                   ├─ OperationScheduler (driver)            │
//! │                   └─ ScheduleTrace, BugReport               │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this layer spawns a thread or takes a lock, except the
//! monitor registry which is shared with the runtime. Every component can be
//! driven directly from a unit test with a hand-built operation table.

pub mod monitor;
pub mod operation;
pub mod random;
pub mod scheduler;
pub mod state;
pub mod strategy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Re-exports
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub use monitor::{LivenessMonitor, LivenessViolation, MonitorId, MonitorRegistry, SharedMonitors};
pub use operation::{
    EventType, Operation, OperationId, OperationStatus, OperationTarget, OperationType,
    ResourceId,
};
pub use random::{DefaultRandomNumberGenerator, RandomNumberGenerator};
pub use scheduler::{
    BugKind, BugReport, IterationOutcome, OperationScheduler, ScheduleStep, ScheduleTrace,
};
pub use state::{AbstractionLevel, HashedState, StateCoverage, StateHasher};
pub use strategy::{SchedulingStrategy, Strategy};
