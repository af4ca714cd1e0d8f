//! DPOR Strategy
//!
//! # Algorithm
//!
//! 1. Walk down the stack. Depths already on the stack replay their
//!    selected operation; new depths capture the operation table, inherit a
//!    sleep set and pick an awake operation.
//! 2. At the end of the iteration, find the races of the path and add the
//!    racing operation to the backtrack set of the earlier frame.
//! 3. Rewind: advance the deepest untried value choice, otherwise move the
//!    deepest frame with unexplored backtrack candidates to its next
//!    candidate, popping exhausted frames.
//! 4. The search ends when the stack is empty.
//!
//! # Random mode
//!
//! Instead of exhausting backtrack sets, a random race of the last path is
//! reversed and the rest of the execution is random. After
//! `race_reversal_limit` consecutive reversals the path is dropped and a
//! fresh random execution starts. Random mode never exhausts.

use tracing::{debug, warn};

use super::race::{find_races, Race};
use super::stack::{ChoiceFrame, ChoiceList, OpSet};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::random::{default_rng, derive_seed, BoxedRng};
use crate::domain::strategy::{bound_reached, SchedulingStrategy};

/// Default number of consecutive race reversals in random mode
pub const DEFAULT_RACE_REVERSAL_LIMIT: usize = 10;

/// Statistics for DPOR exploration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DporStats {
    /// Iterations explored
    pub iterations: u64,
    /// Races found across all iterations
    pub races: u64,
    /// Backtrack points taken
    pub backtracks: u64,
    /// Depths where every enabled operation was asleep
    pub sleep_blocked: u64,
    /// Deepest path seen
    pub max_depth: usize,
}

#[derive(Debug)]
struct RandomMode {
    rng: BoxedRng,
    base_seed: u64,
    iterations: u64,
    reversals: usize,
    limit: usize,
}

/// Dynamic partial-order reduction with sleep sets
#[derive(Debug)]
pub struct DporStrategy {
    frames: Vec<ChoiceFrame>,
    initial: ChoiceList,
    cursor: usize,
    steps: usize,
    max_steps: usize,
    random: Option<RandomMode>,
    stats: DporStats,
}

impl DporStrategy {
    /// Exhaustive DPOR
    pub fn new(max_steps: usize) -> Self {
        Self {
            frames: Vec::new(),
            initial: ChoiceList::default(),
            cursor: 0,
            steps: 0,
            max_steps,
            random: None,
            stats: DporStats::default(),
        }
    }

    /// Random DPOR with race-reversal sampling
    pub fn random(seed: u64, max_steps: usize, race_reversal_limit: usize) -> Self {
        Self::random_with_rng(default_rng(seed), max_steps, race_reversal_limit)
    }

    /// Random DPOR with a custom generator
    pub fn random_with_rng(rng: BoxedRng, max_steps: usize, race_reversal_limit: usize) -> Self {
        let mut strategy = Self::new(max_steps);
        strategy.random = Some(RandomMode {
            base_seed: rng.seed(),
            rng,
            iterations: 0,
            reversals: 0,
            limit: race_reversal_limit,
        });
        strategy
    }

    /// Check if running in random mode
    pub fn is_random(&self) -> bool {
        self.random.is_some()
    }

    /// Exploration statistics
    pub fn stats(&self) -> DporStats {
        self.stats
    }

    /// Depth of the stack
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Remember which send the step at `depth - 1` consumed
    fn record_matching_send(&mut self, ops: &[Operation]) {
        let Some(prev) = self.cursor.checked_sub(1).and_then(|d| self.frames.get_mut(d)) else {
            return;
        };
        let Some(selected) = prev.selected else {
            return;
        };
        if let Some(op) = ops.iter().find(|op| op.id() == selected) {
            if let Some(send) = op.matching_send_index() {
                prev.matching_send = Some(send);
            }
        }
    }

    fn pick(&mut self, current: OperationId, candidates: &OpSet) -> Option<OperationId> {
        match self.random.as_mut() {
            Some(mode) => {
                let ids: Vec<OperationId> = candidates.iter().collect();
                if ids.is_empty() {
                    return None;
                }
                Some(ids[mode.rng.next_bounded(ids.len())])
            }
            None => candidates
                .iter()
                .find(|id| *id >= current)
                .or_else(|| candidates.first()),
        }
    }

    fn push_frame(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        let mut frame = ChoiceFrame::capture(ops);
        frame.sleep = self
            .frames
            .last()
            .map(ChoiceFrame::inherited_sleep)
            .unwrap_or_default();

        let awake = frame.awake();
        let candidates = if awake.is_empty() {
            self.stats.sleep_blocked += 1;
            frame.enabled.clone()
        } else {
            awake
        };

        let choice = self.pick(current.id(), &candidates)?;
        frame.backtrack.insert(choice);
        frame.selected = Some(choice);
        frame.matching_send = ops
            .iter()
            .find(|op| op.id() == choice)
            .and_then(Operation::matching_send_index);
        self.frames.push(frame);
        self.stats.max_depth = self.stats.max_depth.max(self.frames.len());
        Some(choice)
    }

    fn value_choice(&mut self, options: usize) -> usize {
        let list = match self.cursor.checked_sub(1) {
            Some(depth) if depth < self.frames.len() => &mut self.frames[depth].choices,
            _ => &mut self.initial,
        };
        match self.random.as_mut() {
            Some(mode) => list.next(options, |n| mode.rng.next_bounded(n)),
            None => list.next(options, |_| 0),
        }
    }

    fn add_backtrack_points(&mut self, races: &[Race]) {
        for race in races {
            let Some(frame) = self.frames.get_mut(race.frame) else {
                continue;
            };
            if frame.enabled.contains(race.op) {
                frame.backtrack.insert(race.op);
            } else {
                let enabled = frame.enabled.clone();
                frame.backtrack.union_with(&enabled);
            }
        }
    }

    /// Move to the next unexplored point, returning `false` when none is left
    fn rewind_exhaustive(&mut self) -> bool {
        while let Some(depth) = self.frames.len().checked_sub(1) {
            let top = &mut self.frames[depth];
            if top.choices.advance() {
                return true;
            }
            if let Some(selected) = top.selected {
                top.done.insert(selected);
            }
            if let Some(next) = top.unexplored().first() {
                debug!(depth, op = %next, "dpor backtrack");
                top.selected = Some(next);
                top.matching_send = None;
                top.choices.clear();
                self.stats.backtracks += 1;
                return true;
            }
            self.frames.pop();
        }
        self.initial.advance()
    }

    fn rewind_random(&mut self, races: &[Race]) {
        let Some(mode) = self.random.as_mut() else {
            return;
        };
        mode.iterations += 1;
        mode.rng.reseed(derive_seed(mode.base_seed, mode.iterations));

        if races.is_empty() || mode.reversals >= mode.limit {
            self.frames.clear();
            self.initial.clear();
            mode.reversals = 0;
            return;
        }

        let race = races[mode.rng.next_bounded(races.len())];
        self.frames.truncate(race.frame + 1);
        if let Some(top) = self.frames.last_mut() {
            let reversed = if top.enabled.contains(race.op) {
                Some(race.op)
            } else {
                let others: Vec<OperationId> = top
                    .enabled
                    .iter()
                    .filter(|id| Some(*id) != top.selected)
                    .collect();
                (!others.is_empty()).then(|| others[mode.rng.next_bounded(others.len())])
            };
            if let Some(op) = reversed {
                debug!(depth = race.frame, %op, "reversing race");
                top.selected = Some(op);
                top.matching_send = None;
                top.choices.clear();
            }
        }
        mode.reversals += 1;
        self.stats.backtracks += 1;
    }
}

impl SchedulingStrategy for DporStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        if !ops.iter().any(Operation::is_enabled) {
            return None;
        }
        self.record_matching_send(ops);

        let depth = self.cursor;
        let next = match self.frames.get(depth).and_then(|f| f.selected) {
            Some(selected) if ops.iter().any(|op| op.id() == selected && op.is_enabled()) => {
                Some(selected)
            }
            replayed => {
                if replayed.is_some() {
                    warn!(depth, "dpor replay diverged, dropping the rest of the path");
                }
                self.frames.truncate(depth);
                self.push_frame(current, ops)
            }
        };

        if next.is_some() {
            self.cursor += 1;
            self.steps += 1;
        }
        next
    }

    fn next_boolean(&mut self, _current: &Operation, _max_value: usize) -> Option<bool> {
        self.steps += 1;
        Some(self.value_choice(2) == 0)
    }

    fn next_integer(&mut self, _current: &Operation, max_value: usize) -> Option<usize> {
        self.steps += 1;
        Some(self.value_choice(max_value.max(1)))
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.stats.iterations += 1;
        self.frames.truncate(self.cursor);

        let races = find_races(&self.frames);
        self.stats.races += races.len() as u64;

        let more = if self.random.is_some() {
            self.rewind_random(&races);
            true
        } else {
            self.add_backtrack_points(&races);
            self.rewind_exhaustive()
        };

        for frame in &mut self.frames {
            frame.choices.rewind();
        }
        self.initial.rewind();
        self.cursor = 0;
        self.steps = 0;
        more
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.initial.clear();
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
        if self.random.is_some() {
            "rDPOR".to_string()
        } else {
            "DPOR".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::{OperationTarget, OperationType};
    use crate::domain::strategy::testing::enabled_ops;
    use std::collections::HashSet;

    /// Two operations taking one step each; `shared` decides whether the
    /// steps touch the same resource.
    fn run_two_steps(strategy: &mut DporStrategy, shared: bool) -> Vec<OperationId> {
        let mut ops = enabled_ops(2);
        for (i, op) in ops.iter_mut().enumerate() {
            let target = if shared { 0 } else { i };
            op.set_next_operation(OperationType::Acquire, OperationTarget::Resource, target);
        }

        let mut order = Vec::new();
        let mut current = OperationId::new(0);
        while ops.iter().any(|op| op.is_enabled()) {
            let next = strategy
                .next_operation(&ops[current.as_usize()], &ops)
                .expect("enabled operation");
            order.push(next);
            ops[next.as_usize()].on_completed();
            current = next;
        }
        order
    }

    /// Main joins two workers, then touches the resource of the second one
    fn run_join_two_workers(strategy: &mut DporStrategy) -> Vec<OperationId> {
        let workers = [OperationId::new(1), OperationId::new(2)];
        let mut ops = enabled_ops(3);
        ops[0].set_next_join(&workers);
        ops[1].set_next_operation(OperationType::Acquire, OperationTarget::Resource, 1);
        ops[2].set_next_operation(OperationType::Acquire, OperationTarget::Resource, 2);

        let mut joined = false;
        let mut order = Vec::new();
        let mut current = OperationId::new(0);
        loop {
            let done: Vec<bool> = ops.iter().map(|op| op.status().is_completed()).collect();
            ops[0].try_enable(|id| done[id.as_usize()]);
            let Some(next) = strategy.next_operation(&ops[current.as_usize()], &ops) else {
                break;
            };
            order.push(next);
            let op = &mut ops[next.as_usize()];
            if next.as_usize() == 0 && !joined {
                if done[1] && done[2] {
                    joined = true;
                    op.set_next_operation(OperationType::Acquire, OperationTarget::Resource, 2);
                } else {
                    op.on_wait_task(&workers, true);
                }
            } else {
                op.on_completed();
            }
            current = next;
        }
        order
    }

    #[test]
    fn test_join_orders_every_worker_before_main() {
        let mut strategy = DporStrategy::new(0);
        let order = run_join_two_workers(&mut strategy);

        let ids: Vec<usize> = order.iter().map(|id| id.as_usize()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 0]);
        assert!(!strategy.prepare_for_next_iteration());
        assert_eq!(strategy.stats().iterations, 1);
        assert_eq!(strategy.stats().races, 0);
    }

    #[test]
    fn test_independent_steps_explored_once() {
        let mut strategy = DporStrategy::new(0);
        run_two_steps(&mut strategy, false);
        assert!(!strategy.prepare_for_next_iteration());
        assert_eq!(strategy.stats().races, 0);
    }

    #[test]
    fn test_dependent_steps_explore_both_orders() {
        let mut strategy = DporStrategy::new(0);
        let mut orders = HashSet::new();

        loop {
            orders.insert(run_two_steps(&mut strategy, true));
            if !strategy.prepare_for_next_iteration() {
                break;
            }
        }
        assert_eq!(orders.len(), 2);
        assert_eq!(strategy.stats().iterations, 2);
    }

    #[test]
    fn test_value_choices_are_enumerated() {
        let ops = enabled_ops(1);
        let mut strategy = DporStrategy::new(0);
        let mut seen = HashSet::new();

        loop {
            strategy.next_operation(&ops[0], &ops);
            let flag = strategy.next_boolean(&ops[0], 2).expect("choice");
            let value = strategy.next_integer(&ops[0], 2).expect("choice");
            seen.insert((flag, value));
            if !strategy.prepare_for_next_iteration() {
                break;
            }
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_random_mode_never_exhausts() {
        let mut strategy = DporStrategy::random(3, 0, 2);
        for _ in 0..10 {
            run_two_steps(&mut strategy, true);
            assert!(strategy.prepare_for_next_iteration());
        }
        assert!(strategy.is_random());
        assert_eq!(strategy.description(), "rDPOR");
        assert!(!strategy.is_fair());
    }

    #[test]
    fn test_step_counting() {
        let ops = enabled_ops(2);
        let mut strategy = DporStrategy::new(2);
        strategy.next_operation(&ops[0], &ops);
        assert!(!strategy.has_reached_max_steps());
        strategy.next_boolean(&ops[0], 2);
        assert!(strategy.has_reached_max_steps());

        strategy.reset();
        assert_eq!(strategy.scheduled_steps(), 0);
        assert_eq!(strategy.depth(), 0);
    }
}
