//! Scheduler Driver
//!
//! # Module Structure
//!
//! ```text
//! domain/scheduler/
//! ├── driver.rs   OperationScheduler, the per-iteration control loop
//! ├── outcome.rs  IterationOutcome, BugKind, BugReport
//! ├── trace.rs    ScheduleTrace, ScheduleStep
//! └── mod.rs      This file
//! ```
//!
//! # Design Philosophy
//!
//! Everything that decides *who runs next* lives here and is free of
//! threads. The runtime calls into the driver while holding its lock, so the
//! driver never has to think about concurrency at all.

pub mod driver;
pub mod outcome;
pub mod trace;

pub use driver::{OperationScheduler, SchedulerOutput};
pub use outcome::{BugKind, BugReport, IterationOutcome};
pub use trace::{ScheduleStep, ScheduleTrace};
