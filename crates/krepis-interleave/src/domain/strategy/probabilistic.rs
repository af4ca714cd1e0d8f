//! Probabilistic Random Strategy
//!
//! Like [`RandomStrategy`](super::RandomStrategy) but sticky: the current
//! operation keeps running unless `k` coin flips all come up tails, which
//! happens with probability `2^-k`. Long uninterrupted runs with rare
//! preemptions find bugs that uniform switching tends to wash out.

use tracing::debug;

use super::random::RandomStrategy;
use super::{enabled_ids, SchedulingStrategy};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::random::BoxedRng;

/// Random strategy that rarely switches away from the current operation
#[derive(Debug)]
pub struct ProbabilisticRandomStrategy {
    base: RandomStrategy,
    coin_flips: usize,
}

impl ProbabilisticRandomStrategy {
    /// Create with the default generator and `coin_flips` coins
    pub fn new(seed: u64, max_steps: usize, coin_flips: usize) -> Self {
        Self {
            base: RandomStrategy::new(seed, max_steps),
            coin_flips,
        }
    }

    /// Create with a custom generator
    pub fn with_rng(rng: BoxedRng, max_steps: usize, coin_flips: usize) -> Self {
        Self {
            base: RandomStrategy::with_rng(rng, max_steps),
            coin_flips,
        }
    }

    /// Any heads keeps the current operation
    fn should_change(&mut self) -> bool {
        for _ in 0..self.coin_flips {
            if self.base.rng.next_bounded(2) == 1 {
                return false;
            }
        }
        true
    }
}

impl SchedulingStrategy for ProbabilisticRandomStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        let enabled = enabled_ids(ops);
        if enabled.is_empty() {
            return None;
        }
        self.base.steps += 1;

        if enabled.len() > 1 && !self.should_change() && current.is_enabled() {
            return Some(current.id());
        }

        let next = self.base.pick(&enabled);
        debug!(step = self.base.steps, current = %current.id(), next = ?next, "switch");
        next
    }

    fn next_boolean(&mut self, current: &Operation, max_value: usize) -> Option<bool> {
        self.base.next_boolean(current, max_value)
    }

    fn next_integer(&mut self, current: &Operation, max_value: usize) -> Option<usize> {
        self.base.next_integer(current, max_value)
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.base.prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        self.base.reset();
    }

    fn scheduled_steps(&self) -> usize {
        self.base.scheduled_steps()
    }

    fn has_reached_max_steps(&self) -> bool {
        self.base.has_reached_max_steps()
    }

    fn is_fair(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!(
            "ProbabilisticRandom[seed '{}', coin flips '{}']",
            self.base.base_seed(),
            self.coin_flips
        )
    }
}
