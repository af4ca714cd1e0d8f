//! # Error Types
//!
//! Two families of errors exist in the engine:
//!
//! - [`InterleaveError`]: fatal configuration or usage errors. These abort a
//!   testing run and are returned to the caller of the engine.
//! - [`ExecutionCanceled`]: the cooperative cancellation signal. Every
//!   controlled primitive returns `ExecutionResult<T>`; once the current
//!   iteration has been stopped (bug found, step bound reached, deadlock,
//!   schedule explored) every suspended operation observes
//!   `Err(ExecutionCanceled)` and unwinds through `?`.
//!
//! Bugs found in the program under test are NOT errors. They are recorded in
//! the iteration report and surfaced through the final test report.

use crate::domain::operation::OperationId;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fatal Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fatal configuration and usage errors
///
/// These represent internal inconsistencies or invalid input, never bugs in
/// the program under test.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterleaveError {
    /// Strategy selection string could not be parsed
    #[error("Invalid strategy '{input}': {reason}")]
    InvalidStrategy {
        /// The raw selection string
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Test configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation id that the driver never registered
    #[error("Unknown operation: {0}")]
    UnknownOperation(OperationId),

    /// The driver was asked to schedule with zero live operations
    #[error("No live operations to schedule")]
    EmptyOperationSet,

    /// A replayed schedule asked for a decision the trace cannot satisfy
    #[error("Replay diverged at step {step}: {reason}")]
    ReplayDivergence {
        /// Trace index where the divergence happened
        step: usize,
        /// Description of the mismatch
        reason: String,
    },

    /// The controlled runtime failed to host an operation
    #[error("Runtime failure: {0}")]
    Runtime(String),
}

impl InterleaveError {
    /// Check if the error was caused by user supplied configuration
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidStrategy { .. } | Self::InvalidConfig(_))
    }

    /// Check if the error signals a broken replay
    pub fn is_replay_error(&self) -> bool {
        matches!(self, Self::ReplayDivergence { .. })
    }
}

/// Result alias for fallible engine operations
pub type InterleaveResult<T> = Result<T, InterleaveError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cooperative Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why a suspended operation was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The iteration was stopped (bug, bound, deadlock or exhausted schedule)
    IterationStopped,

    /// The operation was woken while not enabled
    NotEnabled,

    /// A thread unknown to the runtime called a controlled primitive
    UncontrolledThread,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::IterationStopped => write!(f, "iteration stopped"),
            CancelReason::NotEnabled => write!(f, "operation not enabled"),
            CancelReason::UncontrolledThread => write!(f, "uncontrolled thread"),
        }
    }
}

/// Cancellation signal observed at a suspension point
///
/// Programs under test propagate it with `?` and must not swallow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Execution canceled: {reason}")]
pub struct ExecutionCanceled {
    /// Cause of the cancellation
    pub reason: CancelReason,
}

impl ExecutionCanceled {
    /// Cancellation because the iteration ended
    #[inline(always)]
    pub const fn stopped() -> Self {
        Self {
            reason: CancelReason::IterationStopped,
        }
    }

    /// Cancellation with an explicit reason
    #[inline(always)]
    pub const fn new(reason: CancelReason) -> Self {
        Self { reason }
    }
}

/// Result of every controlled primitive
pub type ExecutionResult<T> = Result<T, ExecutionCanceled>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = InterleaveError::InvalidStrategy {
            input: "pct:x".into(),
            reason: "bad number".into(),
        };
        assert!(err.is_config_error());
        assert!(!err.is_replay_error());

        let err = InterleaveError::ReplayDivergence {
            step: 3,
            reason: "expected operation".into(),
        };
        assert!(err.is_replay_error());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = InterleaveError::UnknownOperation(OperationId::new(7));
        assert_eq!(err.to_string(), "Unknown operation: Op(7)");

        let canceled = ExecutionCanceled::stopped();
        assert_eq!(canceled.to_string(), "Execution canceled: iteration stopped");
    }
}
