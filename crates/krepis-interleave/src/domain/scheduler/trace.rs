//! Schedule Trace
//!
//! The ordered record of every decision taken in one iteration. Feeding a
//! trace to the replay strategy reproduces the iteration step for step.
//!
//! ```text
//!   #0  Op(0)
//!   #1  Op(1)
//!   #2  bool true
//!   #3  Op(1)
//!   #4  int 3
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::operation::OperationId;

/// One recorded decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScheduleStep {
    /// An operation was scheduled
    Operation(OperationId),
    /// A controlled boolean choice
    Boolean(bool),
    /// A controlled integer choice
    Integer(usize),
}

impl fmt::Display for ScheduleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStep::Operation(id) => write!(f, "{}", id),
            ScheduleStep::Boolean(value) => write!(f, "bool {}", value),
            ScheduleStep::Integer(value) => write!(f, "int {}", value),
        }
    }
}

/// Sequential record of scheduling decisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleTrace {
    steps: Vec<ScheduleStep>,
}

impl ScheduleTrace {
    /// Create an empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scheduled operation
    pub fn push_operation(&mut self, id: OperationId) {
        self.steps.push(ScheduleStep::Operation(id));
    }

    /// Record a boolean choice
    pub fn push_boolean(&mut self, value: bool) {
        self.steps.push(ScheduleStep::Boolean(value));
    }

    /// Record an integer choice
    pub fn push_integer(&mut self, value: usize) {
        self.steps.push(ScheduleStep::Integer(value));
    }

    /// Decision at `index`
    pub fn get(&self, index: usize) -> Option<ScheduleStep> {
        self.steps.get(index).copied()
    }

    /// Number of decisions
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Iterate over decisions in order
    pub fn iter(&self) -> impl Iterator<Item = &ScheduleStep> {
        self.steps.iter()
    }

    /// Scheduled operations only, in order
    pub fn operations(&self) -> impl Iterator<Item = OperationId> + '_ {
        self.steps.iter().filter_map(|step| match step {
            ScheduleStep::Operation(id) => Some(*id),
            _ => None,
        })
    }
}

impl From<Vec<ScheduleStep>> for ScheduleTrace {
    fn from(steps: Vec<ScheduleStep>) -> Self {
        Self { steps }
    }
}

impl fmt::Display for ScheduleTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, step) in self.steps.iter().enumerate() {
            writeln!(f, "#{:<4} {}", idx, step)?;
        }
        Ok(())
    }
}
