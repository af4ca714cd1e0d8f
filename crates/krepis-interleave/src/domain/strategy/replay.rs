//! Replay Strategy
//!
//! Follows a recorded [`ScheduleTrace`] decision by decision. Any mismatch
//! between what the trace says and what the program asks for means the
//! program is not deterministic under control, which is reported as
//! [`InterleaveError::ReplayDivergence`].

use tracing::error;

use super::{bound_reached, is_enabled_in, SchedulingStrategy};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::scheduler::{ScheduleStep, ScheduleTrace};
use crate::error::InterleaveError;

/// Reproduces a recorded schedule exactly
#[derive(Debug)]
pub struct ReplayStrategy {
    trace: ScheduleTrace,
    cursor: usize,
    steps: usize,
    max_steps: usize,
    fair: bool,
    error: Option<InterleaveError>,
}

impl ReplayStrategy {
    /// Replay `trace`, reporting the fairness of the strategy that recorded it
    pub fn new(trace: ScheduleTrace, max_steps: usize, fair: bool) -> Self {
        Self {
            trace,
            cursor: 0,
            steps: 0,
            max_steps,
            fair,
            error: None,
        }
    }

    /// Decisions replayed so far
    pub fn position(&self) -> usize {
        self.cursor
    }

    fn diverge(&mut self, reason: String) {
        error!(step = self.cursor, %reason, "replay diverged");
        if self.error.is_none() {
            self.error = Some(InterleaveError::ReplayDivergence {
                step: self.cursor,
                reason,
            });
        }
    }

    fn next_step(&mut self, expected: &str) -> Option<ScheduleStep> {
        if self.error.is_some() {
            return None;
        }
        match self.trace.get(self.cursor) {
            Some(step) => Some(step),
            None => {
                self.diverge(format!("trace exhausted while expecting {}", expected));
                None
            }
        }
    }
}

impl SchedulingStrategy for ReplayStrategy {
    fn next_operation(&mut self, _current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        if !ops.iter().any(|op| op.is_enabled()) {
            return None;
        }
        match self.next_step("an operation")? {
            ScheduleStep::Operation(id) if is_enabled_in(ops, id) => {
                self.cursor += 1;
                self.steps += 1;
                Some(id)
            }
            ScheduleStep::Operation(id) => {
                self.diverge(format!("{} is not enabled", id));
                None
            }
            other => {
                self.diverge(format!("expected {}, program asked for an operation", other));
                None
            }
        }
    }

    fn next_boolean(&mut self, _current: &Operation, _max_value: usize) -> Option<bool> {
        match self.next_step("a boolean")? {
            ScheduleStep::Boolean(value) => {
                self.cursor += 1;
                self.steps += 1;
                Some(value)
            }
            other => {
                self.diverge(format!("expected {}, program asked for a boolean", other));
                None
            }
        }
    }

    fn next_integer(&mut self, _current: &Operation, max_value: usize) -> Option<usize> {
        match self.next_step("an integer")? {
            ScheduleStep::Integer(value) if value < max_value.max(1) => {
                self.cursor += 1;
                self.steps += 1;
                Some(value)
            }
            other => {
                self.diverge(format!(
                    "expected {}, program asked for an integer below {}",
                    other, max_value
                ));
                None
            }
        }
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.reset();
        false
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.steps = 0;
    }

    fn scheduled_steps(&self) -> usize {
        self.steps
    }

    fn has_reached_max_steps(&self) -> bool {
        bound_reached(self.steps, self.max_steps)
    }

    fn is_fair(&self) -> bool {
        self.fair
    }

    fn description(&self) -> String {
        format!("Replay[{} steps]", self.trace.len())
    }

    fn take_error(&mut self) -> Option<InterleaveError> {
        self.error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::testing::enabled_ops;

    #[test]
    fn test_follows_trace() {
        let ops = enabled_ops(3);
        let trace = ScheduleTrace::from(vec![
            ScheduleStep::Operation(OperationId::new(2)),
            ScheduleStep::Boolean(false),
            ScheduleStep::Operation(OperationId::new(0)),
            ScheduleStep::Integer(4),
        ]);
        let mut strategy = ReplayStrategy::new(trace, 0, true);

        assert_eq!(strategy.next_operation(&ops[0], &ops), Some(OperationId::new(2)));
        assert_eq!(strategy.next_boolean(&ops[2], 2), Some(false));
        assert_eq!(strategy.next_operation(&ops[2], &ops), Some(OperationId::new(0)));
        assert_eq!(strategy.next_integer(&ops[0], 5), Some(4));
        assert!(strategy.take_error().is_none());
        assert!(!strategy.prepare_for_next_iteration());
    }

    #[test]
    fn test_disabled_operation_diverges() {
        let mut ops = enabled_ops(2);
        ops[1].on_wait_event(&[]);
        let trace = ScheduleTrace::from(vec![ScheduleStep::Operation(OperationId::new(1))]);
        let mut strategy = ReplayStrategy::new(trace, 0, false);

        assert_eq!(strategy.next_operation(&ops[0], &ops), None);
        let err = strategy.take_error().expect("divergence");
        assert!(err.is_replay_error());
        assert!(err.to_string().starts_with("Replay diverged at step 0"));
    }

    #[test]
    fn test_kind_mismatch_diverges() {
        let ops = enabled_ops(1);
        let trace = ScheduleTrace::from(vec![ScheduleStep::Boolean(true)]);
        let mut strategy = ReplayStrategy::new(trace, 0, false);

        assert_eq!(strategy.next_integer(&ops[0], 3), None);
        assert!(matches!(
            strategy.take_error(),
            Some(InterleaveError::ReplayDivergence { step: 0, .. })
        ));
    }

    #[test]
    fn test_exhausted_trace_diverges() {
        let ops = enabled_ops(1);
        let mut strategy = ReplayStrategy::new(ScheduleTrace::new(), 0, false);
        assert_eq!(strategy.next_operation(&ops[0], &ops), None);
        assert!(strategy.take_error().is_some());
    }
}
