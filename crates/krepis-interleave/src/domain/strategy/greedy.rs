//! Greedy Random Strategy
//!
//! Random scheduling biased towards novelty. Every scheduling point is
//! identified by the program fingerprint at the configured
//! [`AbstractionLevel`]. At the end of each iteration the strategy remembers
//! which state every action led to, and from then on it prefers the actions
//! it has never taken from the current state:
//!
//! ```text
//!   state s, actions {a, b, c}
//!        │
//!        ├── some action never taken from s ──> random among those
//!        │
//!        └── every action taken before ──────> random among the actions
//!                                              whose successor state has
//!                                              the fewest visits
//! ```
//!
//! Visit counts and successors survive across iterations, bugs included.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::random::RandomStrategy;
use super::{enabled_ids, SchedulingStrategy};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::random::BoxedRng;
use crate::domain::state::{AbstractionLevel, TransitionFrequencies};

// Value choices share the action space with operation ids, from the top.
const TRUE_CHOICE: u64 = u64::MAX;
const FALSE_CHOICE: u64 = u64::MAX - 1;
const MIN_INTEGER_CHOICE: u64 = u64::MAX - 2;

/// Random choice steered towards rarely visited states
#[derive(Debug)]
pub struct GreedyRandomStrategy {
    base: RandomStrategy,
    abstraction: AbstractionLevel,
    successors: HashMap<u64, BTreeMap<u64, u64>>,
    path: Vec<(u64, u64)>,
    frequencies: TransitionFrequencies,
    epochs: u64,
}

impl GreedyRandomStrategy {
    /// Create with the default generator
    pub fn new(seed: u64, max_steps: usize, abstraction: AbstractionLevel) -> Self {
        Self::from_base(RandomStrategy::new(seed, max_steps), abstraction)
    }

    /// Create with a custom generator
    pub fn with_rng(rng: BoxedRng, max_steps: usize, abstraction: AbstractionLevel) -> Self {
        Self::from_base(RandomStrategy::with_rng(rng, max_steps), abstraction)
    }

    fn from_base(base: RandomStrategy, abstraction: AbstractionLevel) -> Self {
        Self {
            base,
            abstraction,
            successors: HashMap::new(),
            path: Vec::new(),
            frequencies: TransitionFrequencies::new(),
            epochs: 0,
        }
    }

    /// Distinct states visited over the whole run
    pub fn unique_states(&self) -> usize {
        self.frequencies.unique_states()
    }

    /// State that `action` led to from `state` on an earlier iteration
    pub fn successor(&self, state: u64, action: u64) -> Option<u64> {
        self.successors.get(&state).and_then(|known| known.get(&action)).copied()
    }

    fn capture(&mut self, current: &Operation) -> u64 {
        let state = current.hashed_state().at(self.abstraction);
        self.frequencies.record(state);
        state
    }

    /// Pick among the non-empty `actions` in `state` and record the step
    fn choose(&mut self, state: u64, actions: &[u64]) -> usize {
        let successors: Vec<Option<u64>> = actions
            .iter()
            .map(|action| self.successor(state, *action))
            .collect();

        let fresh: Vec<usize> = (0..actions.len()).filter(|i| successors[*i].is_none()).collect();
        let candidates = if fresh.is_empty() {
            let visits: Vec<u64> = successors
                .iter()
                .map(|next| next.map_or(0, |s| self.frequencies.frequency(s)))
                .collect();
            let least = visits.iter().copied().min().unwrap_or(0);
            (0..actions.len()).filter(|i| visits[*i] == least).collect()
        } else {
            fresh
        };

        let idx = candidates[self.base.rng.next_bounded(candidates.len())];
        self.path.push((state, actions[idx]));
        self.base.steps += 1;
        idx
    }

    fn learn(&mut self) {
        for step in self.path.windows(2) {
            let (state, action) = step[0];
            let (next_state, _) = step[1];
            self.successors.entry(state).or_default().insert(action, next_state);
        }

        if self.epochs.is_power_of_two() {
            debug!(
                epoch = self.epochs,
                path = self.path.len(),
                unique_states = self.frequencies.unique_states(),
                "greedy random progress"
            );
        }
    }
}

impl SchedulingStrategy for GreedyRandomStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        let enabled = enabled_ids(ops);
        if enabled.is_empty() {
            return None;
        }
        let state = self.capture(current);
        let actions: Vec<u64> = enabled.iter().map(|id| id.as_usize() as u64).collect();
        let idx = self.choose(state, &actions);
        Some(enabled[idx])
    }

    fn next_boolean(&mut self, current: &Operation, _max_value: usize) -> Option<bool> {
        let state = self.capture(current);
        Some(self.choose(state, &[TRUE_CHOICE, FALSE_CHOICE]) == 0)
    }

    fn next_integer(&mut self, current: &Operation, max_value: usize) -> Option<usize> {
        let state = self.capture(current);
        let actions: Vec<u64> = (0..max_value.max(1) as u64)
            .map(|i| MIN_INTEGER_CHOICE - i)
            .collect();
        Some(self.choose(state, &actions))
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.learn();
        self.path.clear();
        self.epochs += 1;
        self.base.prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        self.path.clear();
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
        format!("GreedyRandom[seed '{}']", self.base.base_seed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::HashedState;
    use crate::domain::strategy::testing::enabled_ops;

    fn at_state(op: &mut Operation, value: u64) {
        op.set_hashed_state(HashedState {
            default: value,
            inbox_only: value,
            custom: value,
            full: value,
        });
    }

    fn action(id: OperationId) -> u64 {
        id.as_usize() as u64
    }

    #[test]
    fn test_untried_action_preferred() {
        let mut ops = enabled_ops(2);
        let mut strategy = GreedyRandomStrategy::new(5, 0, AbstractionLevel::Default);

        at_state(&mut ops[0], 10);
        let first = strategy.next_operation(&ops[0], &ops).expect("enabled");
        at_state(&mut ops[0], 20);
        strategy.next_operation(&ops[0], &ops);
        assert!(strategy.prepare_for_next_iteration());
        assert_eq!(strategy.successor(10, action(first)), Some(20));

        at_state(&mut ops[0], 10);
        let second = strategy.next_operation(&ops[0], &ops).expect("enabled");
        assert_ne!(second, first);
    }

    #[test]
    fn test_least_visited_successor_preferred() {
        let mut ops = enabled_ops(2);
        let mut strategy = GreedyRandomStrategy::new(9, 0, AbstractionLevel::Default);

        // 10 --first--> 20
        at_state(&mut ops[0], 10);
        let first = strategy.next_operation(&ops[0], &ops).expect("enabled");
        at_state(&mut ops[0], 20);
        strategy.next_operation(&ops[0], &ops);
        strategy.prepare_for_next_iteration();

        // 10 --second--> 30, then 20 is visited again and again
        at_state(&mut ops[0], 10);
        let second = strategy.next_operation(&ops[0], &ops).expect("enabled");
        at_state(&mut ops[0], 30);
        strategy.next_operation(&ops[0], &ops);
        at_state(&mut ops[0], 20);
        for _ in 0..3 {
            strategy.next_operation(&ops[0], &ops);
        }
        strategy.prepare_for_next_iteration();
        assert_ne!(first, second);
        assert_eq!(strategy.successor(10, action(second)), Some(30));

        at_state(&mut ops[0], 10);
        assert_eq!(strategy.next_operation(&ops[0], &ops), Some(second));
        assert_eq!(strategy.unique_states(), 3);
    }

    #[test]
    fn test_choices_and_steps() {
        let mut ops = enabled_ops(1);
        let mut strategy = GreedyRandomStrategy::new(2, 3, AbstractionLevel::Default);

        assert!(strategy.next_boolean(&ops[0], 2).is_some());
        assert!(strategy.next_integer(&ops[0], 4).is_some_and(|v| v < 4));
        assert_eq!(strategy.scheduled_steps(), 2);

        ops[0].on_completed();
        assert_eq!(strategy.next_operation(&ops[0], &ops), None);
        assert_eq!(strategy.scheduled_steps(), 2);

        assert!(strategy.prepare_for_next_iteration());
        assert_eq!(strategy.scheduled_steps(), 0);
        assert!(strategy.is_fair());
        assert_eq!(strategy.description(), "GreedyRandom[seed '2']");
    }
}
