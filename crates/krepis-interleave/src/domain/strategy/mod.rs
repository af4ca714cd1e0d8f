//! Scheduling Strategies
//!
//! # Overview
//!
//! A strategy answers one question at every scheduling point: *which enabled
//! operation runs next?* It also resolves the program's controlled
//! nondeterministic boolean and integer choices. Varying these answers across
//! iterations is what explores the interleaving space.
//!
//! # Architecture
//!
//! ```text
//!                  ┌────────────────────────────┐
//!                  │  trait SchedulingStrategy  │
//!                  └─────────────┬──────────────┘
//!                                │ implemented by
//!       ┌──────────┬──────────┬──┴───────┬──────────┬──────────┐
//!       ▼          ▼          ▼          ▼          ▼          ▼
//!    Random   Probabilistic  DelayBounding  PCT     DFS      DPOR ...
//!
//!                  ┌────────────────────────────┐
//!                  │        enum Strategy       │  tagged composition
//!                  ├────────────────────────────┤
//!                  │ Random(..) | Pct(..) | ..  │  base strategies
//!                  │ Combo(Box<ComboStrategy>)  │  prefix + suffix
//!                  │ Liveness(Box<Temperature   │  temperature checks
//!                  │   CheckingStrategy>)       │
//!                  └────────────────────────────┘
//! ```
//!
//! The engine owns exactly one [`Strategy`] for the whole run and lends it to
//! each iteration's driver. Nothing is global, so two engines never share
//! random state.
//!
//! # Fairness
//!
//! A strategy is *fair* when every continuously enabled operation is
//! eventually scheduled. Only fair strategies may raise liveness bugs, since
//! an unfair one can starve whoever would have made progress.

pub mod combo;
pub mod dfs;
pub mod dpor;
pub mod delay_bounding;
pub mod greedy;
pub mod liveness;
pub mod pct;
pub mod probabilistic;
pub mod qlearning;
pub mod random;
pub mod replay;

pub use combo::ComboStrategy;
pub use delay_bounding::DelayBoundingStrategy;
pub use dfs::DfsStrategy;
pub use dpor::DporStrategy;
pub use greedy::GreedyRandomStrategy;
pub use liveness::TemperatureCheckingStrategy;
pub use pct::PctStrategy;
pub use probabilistic::ProbabilisticRandomStrategy;
pub use qlearning::QLearningStrategy;
pub use random::RandomStrategy;
pub use replay::ReplayStrategy;

use std::collections::BTreeSet;

use crate::domain::operation::{Operation, OperationId};
use crate::domain::random::RandomNumberGenerator;
use crate::error::InterleaveError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy Contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Contract every exploration strategy fulfils
///
/// `ops` always holds every operation of the iteration in id order,
/// including blocked and completed ones. Implementations only ever return
/// members whose status is Enabled.
pub trait SchedulingStrategy {
    /// Pick the next operation to run, or `None` when nothing is enabled
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId>;

    /// Resolve a controlled boolean choice
    fn next_boolean(&mut self, current: &Operation, max_value: usize) -> Option<bool>;

    /// Resolve a controlled integer choice in `[0, max_value)`
    fn next_integer(&mut self, current: &Operation, max_value: usize) -> Option<usize>;

    /// The current iteration found a bug
    fn notify_bug_found(&mut self) {}

    /// Reset per-iteration state and advance to the next iteration
    ///
    /// Returns `false` only when the search space is exhausted.
    fn prepare_for_next_iteration(&mut self) -> bool;

    /// Hard reset of per-iteration state, used by parent strategies
    fn reset(&mut self);

    /// Scheduling decisions taken in this iteration
    fn scheduled_steps(&self) -> usize;

    /// Check if the step bound of this iteration is reached
    fn has_reached_max_steps(&self) -> bool;

    /// Check if every continuously enabled operation is eventually scheduled
    fn is_fair(&self) -> bool;

    /// Human readable description
    fn description(&self) -> String;

    /// Fatal error raised while scheduling, if any
    fn take_error(&mut self) -> Option<InterleaveError> {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tagged Composition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Any strategy the engine can run
#[derive(Debug)]
pub enum Strategy {
    /// Uniform random choice
    Random(RandomStrategy),
    /// Sticky random choice
    ProbabilisticRandom(ProbabilisticRandomStrategy),
    /// Run-to-completion with a few random delays
    DelayBounding(DelayBoundingStrategy),
    /// Probabilistic concurrency testing
    Pct(PctStrategy),
    /// Exhaustive depth-first search
    Dfs(DfsStrategy),
    /// Dynamic partial-order reduction
    Dpor(DporStrategy),
    /// Reinforcement learning over state fingerprints
    QLearning(QLearningStrategy),
    /// Random choice steered towards rarely visited states
    GreedyRandom(GreedyRandomStrategy),
    /// Follow a recorded trace
    Replay(ReplayStrategy),
    /// Prefix strategy, then suffix strategy
    Combo(Box<ComboStrategy>),
    /// Temperature-checking decorator
    Liveness(Box<TemperatureCheckingStrategy>),
}

macro_rules! dispatch {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            Strategy::Random($s) => $body,
            Strategy::ProbabilisticRandom($s) => $body,
            Strategy::DelayBounding($s) => $body,
            Strategy::Pct($s) => $body,
            Strategy::Dfs($s) => $body,
            Strategy::Dpor($s) => $body,
            Strategy::QLearning($s) => $body,
            Strategy::GreedyRandom($s) => $body,
            Strategy::Replay($s) => $body,
            Strategy::Combo($s) => $body,
            Strategy::Liveness($s) => $body,
        }
    };
}

impl SchedulingStrategy for Strategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        dispatch!(self, s => s.next_operation(current, ops))
    }

    fn next_boolean(&mut self, current: &Operation, max_value: usize) -> Option<bool> {
        dispatch!(self, s => s.next_boolean(current, max_value))
    }

    fn next_integer(&mut self, current: &Operation, max_value: usize) -> Option<usize> {
        dispatch!(self, s => s.next_integer(current, max_value))
    }

    fn notify_bug_found(&mut self) {
        dispatch!(self, s => s.notify_bug_found())
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        dispatch!(self, s => s.prepare_for_next_iteration())
    }

    fn reset(&mut self) {
        dispatch!(self, s => s.reset())
    }

    fn scheduled_steps(&self) -> usize {
        dispatch!(self, s => s.scheduled_steps())
    }

    fn has_reached_max_steps(&self) -> bool {
        dispatch!(self, s => s.has_reached_max_steps())
    }

    fn is_fair(&self) -> bool {
        dispatch!(self, s => s.is_fair())
    }

    fn description(&self) -> String {
        dispatch!(self, s => s.description())
    }

    fn take_error(&mut self) -> Option<InterleaveError> {
        dispatch!(self, s => s.take_error())
    }
}

impl Strategy {
    /// Wrap in the temperature-checking decorator
    pub fn with_liveness(self, monitors: crate::domain::monitor::SharedMonitors) -> Strategy {
        Strategy::Liveness(Box::new(TemperatureCheckingStrategy::new(self, monitors)))
    }

    /// Compose `prefix` and `suffix`
    pub fn combo(prefix: Strategy, suffix: Strategy) -> Strategy {
        Strategy::Combo(Box::new(ComboStrategy::new(prefix, suffix)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ids of the enabled operations, in the order given
pub(crate) fn enabled_ids(ops: &[Operation]) -> Vec<OperationId> {
    ops.iter().filter(|op| op.is_enabled()).map(|op| op.id()).collect()
}

/// Check if `id` is enabled in `ops`
pub(crate) fn is_enabled_in(ops: &[Operation], id: OperationId) -> bool {
    ops.iter().any(|op| op.id() == id && op.is_enabled())
}

/// Step bound check shared by every strategy (0 means unbounded)
#[inline]
pub(crate) const fn bound_reached(steps: usize, max_steps: usize) -> bool {
    max_steps > 0 && steps >= max_steps
}

/// Draw up to `count` distinct points from `[0, length)`
///
/// Fisher-Yates over the whole range, keeping the first `count` entries.
pub(crate) fn sample_points(
    rng: &mut dyn RandomNumberGenerator,
    length: usize,
    count: usize,
) -> BTreeSet<usize> {
    let mut range: Vec<usize> = (0..length).collect();
    for idx in (1..range.len()).rev() {
        let point = rng.next_bounded(length);
        range.swap(idx, point);
    }
    range.into_iter().take(count).collect()
}
