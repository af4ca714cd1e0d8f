//! Delay-Bounding Strategy
//!
//! # Overview
//!
//! Runs the current operation to completion (cooperative, round robin from
//! the current operation) and deviates from that default only at a handful
//! of randomly placed *delay points*:
//!
//! ```text
//!   step:     0   1   2   3   4   5   6   7   8   9
//!   default:  A   A   A   A   A   A   B   B   B   B
//!   delay@3:  A   A   A  [B]  B   B   B   A   A   A
//! ```
//!
//! Many concurrency bugs need only one or two preemptions, so bounding the
//! number of delays makes them likely to be hit.
//!
//! # Iterative variant
//!
//! When the number of distinct visited states stops growing for
//! [`SAMPLING_THRESHOLD`] consecutive iterations, the delay budget grows by
//! one. The search starts cheap and deepens only when it stagnates.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::{bound_reached, sample_points, SchedulingStrategy};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::random::{default_rng, derive_seed, BoxedRng};
use crate::domain::state::{AbstractionLevel, TransitionFrequencies};

/// Stagnant iterations before the iterative variant adds a delay
pub const SAMPLING_THRESHOLD: usize = 100;

/// Bounded number of random delays per iteration
#[derive(Debug)]
pub struct DelayBoundingStrategy {
    rng: BoxedRng,
    base_seed: u64,
    iterations: u64,
    steps: usize,
    max_steps: usize,
    max_delays: usize,
    schedule_length: usize,
    delay_points: BTreeSet<usize>,
    iterative: bool,
    abstraction: AbstractionLevel,
    frequencies: TransitionFrequencies,
    prev_unique_states: usize,
    stagnant_samples: usize,
}

impl DelayBoundingStrategy {
    /// Fixed delay budget
    pub fn new(seed: u64, max_steps: usize, max_delays: usize) -> Self {
        Self::with_rng(default_rng(seed), max_steps, max_delays, false)
    }

    /// Growing delay budget starting at `initial_delays`
    pub fn iterative(seed: u64, max_steps: usize, initial_delays: usize) -> Self {
        Self::with_rng(default_rng(seed), max_steps, initial_delays, true)
    }

    /// Create with a custom generator
    pub fn with_rng(rng: BoxedRng, max_steps: usize, max_delays: usize, iterative: bool) -> Self {
        Self {
            base_seed: rng.seed(),
            rng,
            iterations: 0,
            steps: 0,
            max_steps,
            max_delays,
            schedule_length: 0,
            delay_points: BTreeSet::new(),
            iterative,
            abstraction: AbstractionLevel::Default,
            frequencies: TransitionFrequencies::new(),
            prev_unique_states: 0,
            stagnant_samples: 0,
        }
    }

    /// Fingerprint level used to detect stagnation
    pub fn with_abstraction(mut self, level: AbstractionLevel) -> Self {
        self.abstraction = level;
        self
    }

    /// Current delay budget
    pub fn max_delays(&self) -> usize {
        self.max_delays
    }

    /// Delay points of the current iteration
    pub fn delay_points(&self) -> &BTreeSet<usize> {
        &self.delay_points
    }

    /// Longest iteration seen so far
    pub fn schedule_length(&self) -> usize {
        self.schedule_length
    }
}

impl SchedulingStrategy for DelayBoundingStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        let start = ops.iter().position(|op| op.id() == current.id()).unwrap_or(0);
        let enabled: Vec<OperationId> = ops[start..]
            .iter()
            .chain(ops[..start].iter())
            .filter(|op| op.is_enabled())
            .map(|op| op.id())
            .collect();

        self.frequencies.record(current.hashed_state().at(self.abstraction));

        if enabled.is_empty() {
            return None;
        }

        let next = if enabled.len() == 1 {
            enabled[0]
        } else if !current.is_enabled() {
            enabled[self.rng.next_bounded(enabled.len())]
        } else if self.delay_points.contains(&self.steps) {
            let others: Vec<OperationId> =
                enabled.into_iter().filter(|id| *id != current.id()).collect();
            let next = others[self.rng.next_bounded(others.len())];
            debug!(step = self.steps, from = %current.id(), to = %next, "delay");
            next
        } else {
            current.id()
        };

        self.steps += 1;
        Some(next)
    }

    fn next_boolean(&mut self, current: &Operation, max_value: usize) -> Option<bool> {
        self.frequencies.record(current.hashed_state().at(self.abstraction));
        let next = self.rng.next_bounded(max_value) == 0;
        self.steps += 1;
        Some(next)
    }

    fn next_integer(&mut self, current: &Operation, max_value: usize) -> Option<usize> {
        self.frequencies.record(current.hashed_state().at(self.abstraction));
        let next = self.rng.next_bounded(max_value);
        self.steps += 1;
        Some(next)
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        if self.iterative {
            let unique = self.frequencies.unique_states();
            if unique == self.prev_unique_states {
                self.stagnant_samples += 1;
                if self.stagnant_samples == SAMPLING_THRESHOLD {
                    self.stagnant_samples = 0;
                    self.max_delays += 1;
                    warn!(max_delays = self.max_delays, "increasing delay budget");
                }
            }
            self.prev_unique_states = unique;
        }

        self.iterations += 1;
        self.rng.reseed(derive_seed(self.base_seed, self.iterations));

        self.schedule_length = self.schedule_length.max(self.steps);
        self.steps = 0;
        self.delay_points = sample_points(self.rng.as_mut(), self.schedule_length, self.max_delays);
        true
    }

    fn reset(&mut self) {
        self.schedule_length = 0;
        self.steps = 0;
        self.delay_points.clear();
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
        let name = if self.iterative {
            "IterativeDelayBounding"
        } else {
            "DelayBounding"
        };
        format!(
            "{}[seed '{}', delays '{}']",
            name, self.base_seed, self.max_delays
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::testing::enabled_ops;

    /// Run `len` steps starting on op 0, returning the step indices where
    /// the scheduled operation differs from the previous one.
    fn switch_points(strategy: &mut DelayBoundingStrategy, ops: &[Operation], len: usize) -> Vec<usize> {
        let mut current = OperationId::new(0);
        let mut switches = Vec::new();
        for step in 0..len {
            let next = strategy
                .next_operation(&ops[current.as_usize()], ops)
                .expect("enabled operation");
            if next != current {
                switches.push(step);
            }
            current = next;
        }
        switches
    }

    #[test]
    fn test_first_iteration_runs_without_delays() {
        let ops = enabled_ops(2);
        let mut strategy = DelayBoundingStrategy::new(42, 0, 1);
        assert!(switch_points(&mut strategy, &ops, 10).is_empty());
    }

    #[test]
    fn test_single_delay_over_ten_steps() {
        let ops = enabled_ops(2);
        let mut strategy = DelayBoundingStrategy::new(42, 0, 1);
        switch_points(&mut strategy, &ops, 10);
        assert!(strategy.prepare_for_next_iteration());

        assert_eq!(strategy.schedule_length(), 10);
        assert_eq!(strategy.delay_points().len(), 1);
        let point = *strategy.delay_points().iter().next().expect("one point");
        assert!(point < 10);

        let switches = switch_points(&mut strategy, &ops, 10);
        assert_eq!(switches, vec![point]);
    }

    #[test]
    fn test_delay_points_never_exceed_budget() {
        let ops = enabled_ops(3);
        let mut strategy = DelayBoundingStrategy::new(5, 0, 3);
        for _ in 0..20 {
            switch_points(&mut strategy, &ops, 25);
            strategy.prepare_for_next_iteration();
            assert!(strategy.delay_points().len() <= 3);
            assert!(strategy.delay_points().iter().all(|p| *p < 25));
        }
    }

    #[test]
    fn test_blocked_current_picks_another() {
        let mut ops = enabled_ops(3);
        ops[1].on_wait_event(&[]);
        let mut strategy = DelayBoundingStrategy::new(1, 0, 0);
        let next = strategy.next_operation(&ops[1], &ops);
        assert!(matches!(next, Some(OperationId(0)) | Some(OperationId(2))));
    }

    #[test]
    fn test_iterative_grows_on_stagnation() {
        let ops = enabled_ops(2);
        let mut strategy = DelayBoundingStrategy::iterative(1, 0, 1);

        for _ in 0..=SAMPLING_THRESHOLD {
            switch_points(&mut strategy, &ops, 4);
            strategy.prepare_for_next_iteration();
        }
        assert_eq!(strategy.max_delays(), 2);
        assert!(!strategy.is_fair());
    }

    #[test]
    fn test_reset_clears_schedule() {
        let ops = enabled_ops(2);
        let mut strategy = DelayBoundingStrategy::new(1, 0, 2);
        switch_points(&mut strategy, &ops, 6);
        strategy.prepare_for_next_iteration();
        strategy.reset();

        assert_eq!(strategy.schedule_length(), 0);
        assert!(strategy.delay_points().is_empty());
        assert_eq!(strategy.scheduled_steps(), 0);
    }
}
