//! Q-Learning Strategy
//!
//! # Overview
//!
//! Treats scheduling as a reinforcement learning problem. States are the
//! program fingerprints at the configured [`AbstractionLevel`]; actions are
//! "schedule operation `x`" or "answer a choice with value `v`". Visiting a
//! frequently seen state is penalized, so the learned policy drifts towards
//! unexplored parts of the state space:
//!
//! ```text
//!   Q(s, a) <- (1 - α) Q(s, a) + α (r + γ max Q(s', ·))
//!   r       =  -1 × visits(s')          (ordinary step)
//!   r       =  -1000                    (step into a bug)
//! ```
//!
//! Actions are drawn from a softmax over the Q values of the available
//! actions. Finding a bug wipes everything learned so the search can move on
//! to a different bug.

use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::random::RandomStrategy;
use super::{enabled_ids, SchedulingStrategy};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::random::BoxedRng;
use crate::domain::state::{AbstractionLevel, StateCoverage, TransitionFrequencies};

const LEARNING_RATE: f64 = 0.3;
const GAMMA: f64 = 0.7;
const BUG_STATE_REWARD: f64 = -1000.0;
const BASIC_ACTION_REWARD: f64 = -1.0;

// Action keys for value choices live at the top of the u64 range, far above
// any operation id.
const TRUE_CHOICE: u64 = u64::MAX;
const FALSE_CHOICE: u64 = u64::MAX - 1;
const MIN_INTEGER_CHOICE: u64 = u64::MAX - 2;

type QValues = BTreeMap<u64, f64>;

/// Softmax-policy Q-learning over state fingerprints
#[derive(Debug)]
pub struct QLearningStrategy {
    base: RandomStrategy,
    abstraction: AbstractionLevel,
    q_table: HashMap<u64, QValues>,
    path: Vec<(Option<u64>, u64)>,
    previous_action: Option<u64>,
    frequencies: TransitionFrequencies,
    coverage: StateCoverage,
    bug_found: bool,
    epochs: u64,
}

impl QLearningStrategy {
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
            q_table: HashMap::new(),
            path: Vec::new(),
            previous_action: None,
            frequencies: TransitionFrequencies::new(),
            coverage: StateCoverage::new(),
            bug_found: false,
            epochs: 0,
        }
    }

    /// Number of states with learned Q values
    pub fn known_states(&self) -> usize {
        self.q_table.len()
    }

    /// Learned Q value of `action` in `state`
    pub fn q_value(&self, state: u64, action: u64) -> Option<f64> {
        self.q_table.get(&state).and_then(|q| q.get(&action)).copied()
    }

    fn capture(&mut self, current: &Operation) -> u64 {
        let hashed = current.hashed_state();
        let state = hashed.at(self.abstraction);
        self.coverage.record(hashed);
        self.path.push((self.previous_action, state));
        self.frequencies.record(state);
        state
    }

    fn init_actions(&mut self, state: u64, actions: &[u64]) {
        let q = self.q_table.entry(state).or_default();
        for action in actions {
            q.entry(*action).or_insert(0.0);
        }
    }

    /// Softmax draw among `actions` in `state`, returning the index
    fn choose(&mut self, state: u64, actions: &[u64]) -> usize {
        let q = self.q_table.get(&state);
        let values: Vec<f64> = actions
            .iter()
            .map(|a| q.and_then(|q| q.get(a)).copied().unwrap_or(0.0))
            .collect();
        softmax_index(&values, self.base.rng.next_double())
    }

    fn learn(&mut self) {
        let len = self.path.len();
        for idx in 1..len {
            let (_, state) = self.path[idx - 1];
            let (action, next_state) = self.path[idx];
            let Some(action) = action else { continue };

            let max_q = self
                .q_table
                .get(&next_state)
                .and_then(|q| q.values().copied().reduce(f64::max))
                .unwrap_or(0.0);

            let reward = if idx == len - 1 && self.bug_found {
                BUG_STATE_REWARD
            } else {
                BASIC_ACTION_REWARD * self.frequencies.frequency(next_state) as f64
            };

            let q = self.q_table.entry(state).or_default().entry(action).or_insert(0.0);
            *q = (1.0 - LEARNING_RATE) * *q + LEARNING_RATE * (reward + GAMMA * max_q);
        }

        if self.epochs.is_power_of_two() || self.bug_found {
            let counts = self.coverage.counts();
            debug!(
                epoch = self.epochs,
                path = len,
                unique_states = self.frequencies.unique_states(),
                default_states = counts.default,
                inbox_states = counts.inbox_only,
                custom_states = counts.custom,
                full_states = counts.full,
                "q-learning progress"
            );
        }
    }

    fn reset_learning(&mut self) {
        self.q_table.clear();
        self.path.clear();
        self.frequencies.clear();
        self.previous_action = None;
    }
}

/// Pick an index from the softmax distribution of `values` using `draw` in `[0, 1)`
fn softmax_index(values: &[f64], draw: f64) -> usize {
    if values.is_empty() {
        return 0;
    }
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let weights: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = weights.iter().sum();

    let mut cumulative = 0.0;
    for (idx, weight) in weights.iter().enumerate() {
        cumulative += weight / total;
        if cumulative >= draw {
            return idx;
        }
    }
    values.len() - 1
}

impl SchedulingStrategy for QLearningStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        let enabled = enabled_ids(ops);
        if enabled.is_empty() {
            return None;
        }

        let state = self.capture(current);
        let actions: Vec<u64> = enabled.iter().map(|id| id.as_usize() as u64).collect();
        self.init_actions(state, &actions);

        let idx = self.choose(state, &actions);
        let next = enabled[idx];
        self.previous_action = Some(actions[idx]);
        self.base.steps += 1;
        Some(next)
    }

    fn next_boolean(&mut self, current: &Operation, _max_value: usize) -> Option<bool> {
        let state = self.capture(current);
        let actions = [TRUE_CHOICE, FALSE_CHOICE];
        self.init_actions(state, &actions);

        let next = self.choose(state, &actions) == 0;
        self.previous_action = Some(if next { TRUE_CHOICE } else { FALSE_CHOICE });
        self.base.steps += 1;
        Some(next)
    }

    fn next_integer(&mut self, current: &Operation, max_value: usize) -> Option<usize> {
        let state = self.capture(current);
        let actions: Vec<u64> = (0..max_value.max(1) as u64)
            .map(|i| MIN_INTEGER_CHOICE - i)
            .collect();
        self.init_actions(state, &actions);

        let next = self.choose(state, &actions);
        self.previous_action = Some(actions[next]);
        self.base.steps += 1;
        Some(next)
    }

    fn notify_bug_found(&mut self) {
        self.bug_found = true;
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.learn();
        self.path.clear();
        self.previous_action = None;
        self.epochs += 1;

        if self.bug_found {
            self.reset_learning();
            self.bug_found = false;
        }
        self.base.prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        self.path.clear();
        self.previous_action = None;
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
        format!("QLearning[seed '{}']", self.base.base_seed())
    }
}
