//! Iteration Outcomes & Bug Reports

use serde::{Deserialize, Serialize};
use std::fmt;

use super::trace::ScheduleTrace;

/// Category of a detected bug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugKind {
    /// A safety assertion failed
    Assertion,
    /// An operation panicked
    Panic,
    /// No operation is enabled but some are blocked
    Deadlock,
    /// A liveness monitor stayed hot under a fair schedule
    Liveness,
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BugKind::Assertion => write!(f, "assertion failure"),
            BugKind::Panic => write!(f, "panic"),
            BugKind::Deadlock => write!(f, "deadlock"),
            BugKind::Liveness => write!(f, "liveness violation"),
        }
    }
}

/// How an iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    /// Every operation completed
    Completed,
    /// A bug was found and the iteration halted
    BugFound(BugKind),
    /// The strategy's step bound was hit (inconclusive)
    StepBoundReached,
}

impl IterationOutcome {
    /// Check if the iteration found a bug
    #[inline]
    pub const fn is_bug(self) -> bool {
        matches!(self, IterationOutcome::BugFound(_))
    }
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationOutcome::Completed => write!(f, "completed"),
            IterationOutcome::BugFound(kind) => write!(f, "bug found ({})", kind),
            IterationOutcome::StepBoundReached => write!(f, "step bound reached"),
        }
    }
}

/// Everything needed to understand and reproduce a bug
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugReport {
    /// Bug category
    pub kind: BugKind,
    /// Human readable description
    pub message: String,
    /// Decisions that led to the bug
    pub trace: ScheduleTrace,
    /// Scheduling steps taken before the bug
    pub scheduled_steps: usize,
    /// Iteration (0-based) that found the bug
    pub iteration: u64,
    /// Description of the strategy that found it
    pub strategy: String,
}

impl fmt::Display for BugReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Found {} in iteration {} after {} steps ({}): {}",
            self.kind, self.iteration, self.scheduled_steps, self.strategy, self.message
        )?;
        write!(f, "{}", self.trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_predicates() {
        assert!(IterationOutcome::BugFound(BugKind::Deadlock).is_bug());
        assert!(!IterationOutcome::StepBoundReached.is_bug());
        assert_eq!(
            IterationOutcome::BugFound(BugKind::Liveness).to_string(),
            "bug found (liveness violation)"
        );
    }

    #[test]
    fn test_bug_report_serializes() {
        let report = BugReport {
            kind: BugKind::Assertion,
            message: "x == 1".into(),
            trace: ScheduleTrace::new(),
            scheduled_steps: 4,
            iteration: 2,
            strategy: "Random[seed '1']".into(),
        };
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["kind"], "assertion");
        assert_eq!(json["scheduled_steps"], 4);
    }
}
