//! Uniform Random Strategy

use tracing::debug;

use super::{bound_reached, enabled_ids, SchedulingStrategy};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::random::{default_rng, derive_seed, BoxedRng};

/// Picks uniformly among the enabled operations at every step
///
/// Iteration `i` runs on a stream seeded from the base seed and `i`, so any
/// single iteration can be reproduced from `(seed, i)` alone.
///
/// # Example
///
/// ```rust
/// use krepis_interleave::domain::strategy::{RandomStrategy, SchedulingStrategy};
///
/// let strategy = RandomStrategy::new(42, 1000);
/// assert!(strategy.is_fair());
/// assert_eq!(strategy.description(), "Random[seed '42']");
/// ```
#[derive(Debug)]
pub struct RandomStrategy {
    pub(super) rng: BoxedRng,
    base_seed: u64,
    iterations: u64,
    pub(super) steps: usize,
    max_steps: usize,
}

impl RandomStrategy {
    /// Create with the default generator
    ///
    /// `max_steps` of 0 means unbounded.
    pub fn new(seed: u64, max_steps: usize) -> Self {
        Self::with_rng(default_rng(seed), max_steps)
    }

    /// Create with a custom generator
    pub fn with_rng(rng: BoxedRng, max_steps: usize) -> Self {
        Self {
            base_seed: rng.seed(),
            rng,
            iterations: 0,
            steps: 0,
            max_steps,
        }
    }

    /// Seed the run started from
    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    /// Completed iterations
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Uniform pick without touching the step counter
    pub(super) fn pick(&mut self, enabled: &[OperationId]) -> Option<OperationId> {
        if enabled.is_empty() {
            return None;
        }
        let idx = self.rng.next_bounded(enabled.len());
        Some(enabled[idx])
    }
}

impl SchedulingStrategy for RandomStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        let enabled = enabled_ids(ops);
        let next = self.pick(&enabled)?;
        self.steps += 1;
        debug!(step = self.steps, current = %current.id(), %next, "random choice");
        Some(next)
    }

    fn next_boolean(&mut self, _current: &Operation, max_value: usize) -> Option<bool> {
        self.steps += 1;
        Some(self.rng.next_bounded(max_value) == 0)
    }

    fn next_integer(&mut self, _current: &Operation, max_value: usize) -> Option<usize> {
        self.steps += 1;
        Some(self.rng.next_bounded(max_value))
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.iterations += 1;
        self.rng.reseed(derive_seed(self.base_seed, self.iterations));
        self.steps = 0;
        true
    }

    fn reset(&mut self) {
        self.steps = 0;
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
        format!("Random[seed '{}']", self.base_seed)
    }
}
