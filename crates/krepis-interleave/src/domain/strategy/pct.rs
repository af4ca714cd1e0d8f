//! PCT: Probabilistic Concurrency Testing
//!
//! # Overview
//!
//! Every operation gets a random priority and the highest-priority enabled
//! operation always runs. At `d` randomly chosen steps (the *priority change
//! points*) the running operation is demoted to the lowest priority. A bug of
//! depth `d` is then found with probability at least `1 / (n * k^(d-1))`
//! for `n` operations and `k` steps.
//!
//! ```text
//!   priorities:  [B, A, C]     B runs until blocked or demoted
//!   change @ 4:  [A, C, B]     A runs
//! ```
//!
//! New operations are inserted at a random position *after* the head, so
//! the operation running when they appear keeps its precedence.

use std::collections::BTreeSet;
use tracing::debug;

use super::{bound_reached, enabled_ids, sample_points, SchedulingStrategy};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::random::{default_rng, derive_seed, BoxedRng};

/// Priority-based randomized scheduler with bounded priority changes
#[derive(Debug)]
pub struct PctStrategy {
    rng: BoxedRng,
    base_seed: u64,
    iterations: u64,
    steps: usize,
    max_steps: usize,
    max_change_points: usize,
    schedule_length: usize,
    prioritized: Vec<OperationId>,
    change_points: BTreeSet<usize>,
}

impl PctStrategy {
    /// Create with the default generator
    pub fn new(seed: u64, max_steps: usize, max_change_points: usize) -> Self {
        Self::with_rng(default_rng(seed), max_steps, max_change_points)
    }

    /// Create with a custom generator
    pub fn with_rng(rng: BoxedRng, max_steps: usize, max_change_points: usize) -> Self {
        Self {
            base_seed: rng.seed(),
            rng,
            iterations: 0,
            steps: 0,
            max_steps,
            max_change_points,
            schedule_length: 0,
            prioritized: Vec::new(),
            change_points: BTreeSet::new(),
        }
    }

    /// Priority change points of the current iteration
    pub fn change_points(&self) -> &BTreeSet<usize> {
        &self.change_points
    }

    /// Operations from highest to lowest priority
    pub fn priorities(&self) -> &[OperationId] {
        &self.prioritized
    }

    fn highest_priority_enabled(&self, enabled: &[OperationId]) -> Option<OperationId> {
        self.prioritized.iter().copied().find(|id| enabled.contains(id))
    }

    fn move_change_point_forward(&mut self) {
        self.change_points.remove(&self.steps);
        let mut point = self.steps + 1;
        while self.change_points.contains(&point) {
            point += 1;
        }
        self.change_points.insert(point);
        debug!(point, "moving priority change point");
    }

    fn prioritized_operation(&mut self, current: OperationId, enabled: &[OperationId]) -> Option<OperationId> {
        if self.prioritized.is_empty() {
            self.prioritized.push(current);
        }

        for id in enabled {
            if !self.prioritized.contains(id) {
                let index = self.rng.next_bounded(self.prioritized.len()) + 1;
                self.prioritized.insert(index, *id);
                debug!(op = %id, index, "new operation prioritized");
            }
        }

        if self.change_points.contains(&self.steps) {
            if enabled.len() == 1 {
                self.move_change_point_forward();
            } else if let Some(demoted) = self.highest_priority_enabled(enabled) {
                self.prioritized.retain(|id| *id != demoted);
                self.prioritized.push(demoted);
                debug!(op = %demoted, step = self.steps, "demoted to lowest priority");
            }
        }

        self.highest_priority_enabled(enabled)
    }
}

impl SchedulingStrategy for PctStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        let enabled = enabled_ids(ops);
        if enabled.is_empty() {
            return None;
        }
        let next = self.prioritized_operation(current.id(), &enabled);
        self.steps += 1;
        next
    }

    fn next_boolean(&mut self, _current: &Operation, max_value: usize) -> Option<bool> {
        let next = self.rng.next_bounded(max_value) == 0;
        self.steps += 1;
        Some(next)
    }

    fn next_integer(&mut self, _current: &Operation, max_value: usize) -> Option<usize> {
        let next = self.rng.next_bounded(max_value);
        self.steps += 1;
        Some(next)
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.iterations += 1;
        self.rng.reseed(derive_seed(self.base_seed, self.iterations));

        self.schedule_length = self.schedule_length.max(self.steps);
        self.steps = 0;

        self.prioritized.clear();
        self.change_points =
            sample_points(self.rng.as_mut(), self.schedule_length, self.max_change_points);
        true
    }

    fn reset(&mut self) {
        self.schedule_length = 0;
        self.steps = 0;
        self.prioritized.clear();
        self.change_points.clear();
    }

    fn scheduled_steps(&self) -> usize {
        self.steps
    }

    fn has_reached_max_steps(&self) -> bool {
        bound_reached(self.steps, self.max_steps)
    }

    fn is_fair(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        let points: Vec<String> = self.change_points.iter().map(|p| p.to_string()).collect();
        format!(
            "PCT[priority change points '{}' [{}], seed '{}']",
            self.max_change_points,
            points.join(", "),
            self.base_seed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::testing::enabled_ops;

    #[test]
    fn test_current_keeps_top_priority_without_change_points() {
        let ops = enabled_ops(4);
        let mut strategy = PctStrategy::new(7, 0, 0);

        for _ in 0..20 {
            assert_eq!(strategy.next_operation(&ops[2], &ops), Some(OperationId::new(2)));
        }
        assert_eq!(strategy.priorities()[0], OperationId::new(2));
        assert_eq!(strategy.priorities().len(), 4);
    }

    #[test]
    fn test_change_point_demotes_running_operation() {
        let ops = enabled_ops(2);
        let mut strategy = PctStrategy::new(3, 0, 1);

        for _ in 0..6 {
            strategy.next_operation(&ops[0], &ops);
        }
        strategy.prepare_for_next_iteration();
        let point = *strategy.change_points().iter().next().expect("one change point");

        let mut chosen = Vec::new();
        for _ in 0..6 {
            chosen.push(strategy.next_operation(&ops[0], &ops).expect("enabled"));
        }
        assert!(chosen[..point].iter().all(|id| *id == OperationId::new(0)));
        assert!(chosen[point..].iter().all(|id| *id == OperationId::new(1)));
    }

    #[test]
    fn test_single_enabled_moves_change_point() {
        let mut ops = enabled_ops(2);
        let mut strategy = PctStrategy::new(3, 0, 1);
        for _ in 0..4 {
            strategy.next_operation(&ops[0], &ops);
        }
        strategy.prepare_for_next_iteration();
        let point = *strategy.change_points().iter().next().expect("one change point");

        ops[1].on_wait_event(&[]);
        for _ in 0..=point {
            assert_eq!(strategy.next_operation(&ops[0], &ops), Some(OperationId::new(0)));
        }
        assert!(strategy.change_points().contains(&(point + 1)));
    }

    #[test]
    fn test_description_lists_points() {
        let strategy = PctStrategy::new(12, 0, 3);
        assert_eq!(
            strategy.description(),
            "PCT[priority change points '3' [], seed '12']"
        );
        assert!(strategy.is_fair());
    }
}
