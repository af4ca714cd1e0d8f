//! Combo Strategy
//!
//! Runs a prefix strategy until it reaches its own step bound, then hands the
//! rest of the iteration to a suffix strategy:
//!
//! ```text
//!   step:   0 ............ k ................... n
//!           │   prefix     │       suffix        │
//!           └──────────────┴─────────────────────┘
//!                   prefix.has_reached_max_steps()
//! ```
//!
//! A bounded unfair prefix with a fair suffix gives a fair strategy that
//! still benefits from the prefix's search bias (see fair PCT).

use super::{SchedulingStrategy, Strategy};
use crate::domain::operation::{Operation, OperationId};
use crate::error::InterleaveError;

/// Prefix strategy followed by suffix strategy
#[derive(Debug)]
pub struct ComboStrategy {
    prefix: Strategy,
    suffix: Strategy,
}

impl ComboStrategy {
    /// Compose `prefix` and `suffix`
    pub fn new(prefix: Strategy, suffix: Strategy) -> Self {
        Self { prefix, suffix }
    }

    fn in_suffix(&self) -> bool {
        self.prefix.has_reached_max_steps()
    }
}

impl SchedulingStrategy for ComboStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        if self.in_suffix() {
            self.suffix.next_operation(current, ops)
        } else {
            self.prefix.next_operation(current, ops)
        }
    }

    fn next_boolean(&mut self, current: &Operation, max_value: usize) -> Option<bool> {
        if self.in_suffix() {
            self.suffix.next_boolean(current, max_value)
        } else {
            self.prefix.next_boolean(current, max_value)
        }
    }

    fn next_integer(&mut self, current: &Operation, max_value: usize) -> Option<usize> {
        if self.in_suffix() {
            self.suffix.next_integer(current, max_value)
        } else {
            self.prefix.next_integer(current, max_value)
        }
    }

    fn notify_bug_found(&mut self) {
        self.prefix.notify_bug_found();
        self.suffix.notify_bug_found();
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        let prefix = self.prefix.prepare_for_next_iteration();
        let suffix = self.suffix.prepare_for_next_iteration();
        prefix || suffix
    }

    fn reset(&mut self) {
        self.prefix.reset();
        self.suffix.reset();
    }

    fn scheduled_steps(&self) -> usize {
        if self.in_suffix() {
            self.prefix.scheduled_steps() + self.suffix.scheduled_steps()
        } else {
            self.prefix.scheduled_steps()
        }
    }

    fn has_reached_max_steps(&self) -> bool {
        self.suffix.has_reached_max_steps()
    }

    fn is_fair(&self) -> bool {
        self.suffix.is_fair()
    }

    fn description(&self) -> String {
        format!(
            "Combo[{},{}]",
            self.prefix.description(),
            self.suffix.description()
        )
    }

    fn take_error(&mut self) -> Option<InterleaveError> {
        self.prefix.take_error().or_else(|| self.suffix.take_error())
    }
}
