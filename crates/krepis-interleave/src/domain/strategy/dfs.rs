//! Depth-First Search Strategy
//!
//! Enumerates every schedule (and every nondeterministic choice) of a
//! bounded program exactly once, in depth-first order. Each decision pushes
//! a frame remembering how many alternatives existed and which one was
//! taken; at the end of an iteration the deepest frame with an untried
//! alternative is advanced and everything below it is discarded.
//!
//! ```text
//!   depth 0: [A] B        A taken, B pending
//!   depth 1:  A [C]       C taken, last alternative
//!   depth 2: [T] F        true taken, false pending  <-- advanced next
//! ```

use tracing::debug;

use super::{bound_reached, enabled_ids, SchedulingStrategy};
use crate::domain::operation::{Operation, OperationId};

/// One decision of the current path
#[derive(Debug, Clone, PartialEq, Eq)]
struct DfsFrame {
    /// Candidates of a scheduling decision (empty for value choices)
    operations: Vec<OperationId>,
    /// Number of alternatives
    options: usize,
    /// Alternative taken on the current path
    index: usize,
}

impl DfsFrame {
    fn has_untried(&self) -> bool {
        self.index + 1 < self.options
    }
}

/// Exhaustive depth-first enumeration
#[derive(Debug, Default)]
pub struct DfsStrategy {
    stack: Vec<DfsFrame>,
    cursor: usize,
    steps: usize,
    max_steps: usize,
    explored: u64,
}

impl DfsStrategy {
    /// Create with a step bound (0 means unbounded)
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps,
            ..Self::default()
        }
    }

    /// Depth of the recorded path
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Fully explored iterations so far
    pub fn explored(&self) -> u64 {
        self.explored
    }

    /// Take the recorded alternative at the cursor, or open a new frame
    fn choose(&mut self, operations: Vec<OperationId>, options: usize) -> usize {
        let index = match self.stack.get(self.cursor) {
            Some(frame) if frame.options == options => frame.index,
            _ => {
                // A different branching factor means the program is not
                // deterministic under replay, drop the stale suffix.
                self.stack.truncate(self.cursor);
                self.stack.push(DfsFrame {
                    operations,
                    options,
                    index: 0,
                });
                0
            }
        };
        self.cursor += 1;
        self.steps += 1;
        index
    }
}

impl SchedulingStrategy for DfsStrategy {
    fn next_operation(&mut self, _current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        let enabled = enabled_ids(ops);
        if enabled.is_empty() {
            return None;
        }
        let options = enabled.len();
        let index = self.choose(enabled.clone(), options);
        enabled.get(index).copied()
    }

    fn next_boolean(&mut self, _current: &Operation, _max_value: usize) -> Option<bool> {
        Some(self.choose(Vec::new(), 2) == 0)
    }

    fn next_integer(&mut self, _current: &Operation, max_value: usize) -> Option<usize> {
        Some(self.choose(Vec::new(), max_value.max(1)))
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.explored += 1;
        self.stack.truncate(self.cursor);
        self.cursor = 0;
        self.steps = 0;

        while let Some(depth) = self.stack.len().checked_sub(1) {
            let top = &mut self.stack[depth];
            if top.has_untried() {
                top.index += 1;
                debug!(depth, index = top.index, candidates = ?top.operations, "dfs backtrack");
                return true;
            }
            self.stack.pop();
        }
        false
    }

    fn reset(&mut self) {
        self.stack.clear();
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
        false
    }

    fn description(&self) -> String {
        "DFS".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::testing::enabled_ops;
    use std::collections::HashSet;

    #[test]
    fn test_enumerates_all_orders_of_two_steps() {
        let ops = enabled_ops(2);
        let mut strategy = DfsStrategy::new(0);
        let mut seen = HashSet::new();

        loop {
            let a = strategy.next_operation(&ops[0], &ops);
            let b = strategy.next_operation(&ops[0], &ops);
            seen.insert((a, b));
            if !strategy.prepare_for_next_iteration() {
                break;
            }
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(strategy.explored(), 4);
    }

    #[test]
    fn test_enumerates_value_choices() {
        let ops = enabled_ops(1);
        let mut strategy = DfsStrategy::new(0);
        let mut seen = Vec::new();

        loop {
            let flag = strategy.next_boolean(&ops[0], 2).expect("choice");
            let value = strategy.next_integer(&ops[0], 3).expect("choice");
            seen.push((flag, value));
            if !strategy.prepare_for_next_iteration() {
                break;
            }
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], (true, 0));
        assert_eq!(seen[5], (false, 2));
    }

    #[test]
    fn test_no_choices_is_single_schedule() {
        let mut strategy = DfsStrategy::new(0);
        assert!(!strategy.prepare_for_next_iteration());
        assert!(!strategy.is_fair());
        assert_eq!(strategy.description(), "DFS");
    }

    #[test]
    fn test_reset_forgets_path() {
        let ops = enabled_ops(3);
        let mut strategy = DfsStrategy::new(2);
        strategy.next_operation(&ops[0], &ops);
        strategy.next_operation(&ops[0], &ops);
        assert!(strategy.has_reached_max_steps());

        strategy.reset();
        assert_eq!(strategy.depth(), 0);
        assert_eq!(strategy.scheduled_steps(), 0);
    }
}
