//! Krepis Interleave - Systematic Concurrency Testing
//!
//! # Overview
//!
//! `krepis-interleave` runs a concurrent program many times, each time
//! serializing its operations under a schedule picked by an exploration
//! strategy, and reports assertion failures, panics, deadlocks and liveness
//! violations together with a trace that replays them exactly.
//!
//! # Trinity Architecture
//!
//! - **Domain**: operations, strategies, the scheduling driver, monitors
//! - **Infrastructure**: the controlled runtime (threads, parking, inboxes)
//! - **Adapters**: configuration, the testing engine and reports
//!
//! # Guarantees
//!
//! - **Determinism**: the same program, strategy and seed give the same
//!   schedules and outcomes.
//! - **Replay**: the trace of a bug reproduces it step for step.
//! - **Serialization**: at most one operation runs between two scheduling
//!   points.
//!
//! # Usage
//!
//! ```rust
//! use krepis_interleave::{BugKind, ExecutionResult, OperationContext, TestConfig, TestingEngine};
//!
//! // Classic lock-order inversion.
//! fn program(ctx: &OperationContext) -> ExecutionResult<()> {
//!     let a = ctx.create_resource()?;
//!     let b = ctx.create_resource()?;
//!     let worker = ctx.spawn("worker", move |ctx| {
//!         ctx.acquire(b)?;
//!         ctx.acquire(a)?;
//!         ctx.release(a)?;
//!         ctx.release(b)
//!     })?;
//!     ctx.acquire(a)?;
//!     ctx.acquire(b)?;
//!     ctx.release(b)?;
//!     ctx.release(a)?;
//!     ctx.join(&[worker])
//! }
//!
//! let config = TestConfig::default()
//!     .with_strategy("pct:3".parse().unwrap())
//!     .with_iterations(200)
//!     .with_seed(7);
//! let engine = TestingEngine::new(config).unwrap();
//! let report = engine.run(program).unwrap();
//!
//! if let Some(bug) = report.first_bug() {
//!     assert_eq!(bug.kind, BugKind::Deadlock);
//!     let replayed = engine.replay(&bug.trace, program).unwrap();
//!     assert_eq!(replayed.first_bug().map(|b| b.kind), Some(BugKind::Deadlock));
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;

// Trinity Architecture Layers
pub mod domain;
pub mod infrastructure;
pub mod adapters;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Re-export Primary Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// Testing surface
pub use adapters::{IterationReport, StrategyConfig, TestConfig, TestReport, TestingEngine};

// Controlled primitives
pub use infrastructure::{Message, OperationContext};

// Operations
pub use domain::operation::{EventType, OperationId, ResourceId};

// Scheduling results
pub use domain::{
    AbstractionLevel,
    BugKind,
    BugReport,
    HashedState,
    IterationOutcome,
    MonitorId,
    ScheduleStep,
    ScheduleTrace,
    SchedulingStrategy,
    StateHasher,
    Strategy,
};

// Errors
pub use error::{ExecutionCanceled, ExecutionResult, InterleaveError, InterleaveResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_defined() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_primary_types_exported() {
        let _op = OperationId::new(0);
        let _event = EventType::new(1);
        let _outcome = IterationOutcome::Completed;
        let config = TestConfig::default();
        assert_eq!(config.strategy, StrategyConfig::Random);
    }
}
