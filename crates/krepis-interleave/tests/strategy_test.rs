//! Integration tests for the strategy contract
//!
//! These drive strategies directly with hand-built operation tables, the
//! same way the driver calls them.

use krepis_interleave::domain::operation::{Operation, OperationId, OperationStatus};
use krepis_interleave::domain::strategy::{
    DelayBoundingStrategy, DfsStrategy, DporStrategy, GreedyRandomStrategy, PctStrategy,
    ProbabilisticRandomStrategy, QLearningStrategy, RandomStrategy,
};
use krepis_interleave::{AbstractionLevel, SchedulingStrategy, Strategy};

fn enabled_ops(ids: &[usize]) -> Vec<Operation> {
    ids.iter()
        .map(|id| {
            let mut op = Operation::new(OperationId::new(*id), format!("op{}", id));
            op.on_created();
            op
        })
        .collect()
}

/// Run `steps` decisions, always resuming whatever was picked
fn schedule(strategy: &mut impl SchedulingStrategy, ops: &[Operation], steps: usize) -> Vec<OperationId> {
    let mut current = ops[0].id();
    let mut picked = Vec::with_capacity(steps);
    for _ in 0..steps {
        let op = ops
            .iter()
            .find(|op| op.id() == current)
            .expect("current operation in table");
        let next = strategy.next_operation(op, ops).expect("enabled operation");
        picked.push(next);
        current = next;
    }
    picked
}

fn all_strategies() -> Vec<Strategy> {
    vec![
        Strategy::Random(RandomStrategy::new(7, 0)),
        Strategy::ProbabilisticRandom(ProbabilisticRandomStrategy::new(7, 0, 3)),
        Strategy::Pct(PctStrategy::new(7, 0, 2)),
        Strategy::DelayBounding(DelayBoundingStrategy::new(7, 0, 2)),
        Strategy::Dfs(DfsStrategy::new(0)),
        Strategy::Dpor(DporStrategy::new(0)),
        Strategy::QLearning(QLearningStrategy::new(7, 0, AbstractionLevel::Default)),
        Strategy::GreedyRandom(GreedyRandomStrategy::new(7, 0, AbstractionLevel::Default)),
    ]
}

#[test]
fn test_random_seed_42_is_reproducible() {
    let ops = enabled_ops(&[1, 2]);
    let mut first = RandomStrategy::new(42, 0);
    let mut second = RandomStrategy::new(42, 0);

    let a = schedule(&mut first, &ops, 5);
    let b = schedule(&mut second, &ops, 5);
    assert_eq!(a, b);
    assert!(a.iter().all(|id| id.as_usize() == 1 || id.as_usize() == 2));
}

#[test]
fn test_only_enabled_operations_are_returned() {
    let mut ops = enabled_ops(&[0, 1, 2, 3]);
    ops[1].on_wait_event(&[]);
    ops[3].on_wait_task(&[OperationId::new(1)], true);

    for mut strategy in all_strategies() {
        for _ in 0..20 {
            let next = strategy
                .next_operation(&ops[0], &ops)
                .expect("two operations enabled");
            assert!(
                next == OperationId::new(0) || next == OperationId::new(2),
                "{} returned blocked {}",
                strategy.description(),
                next
            );
        }
    }
}

#[test]
fn test_no_enabled_operation_returns_none() {
    let mut ops = enabled_ops(&[0, 1]);
    ops[0].on_wait_event(&[]);
    ops[1].on_completed();

    for mut strategy in all_strategies() {
        assert_eq!(strategy.next_operation(&ops[0], &ops), None);
        assert_eq!(strategy.scheduled_steps(), 0, "{}", strategy.description());
    }
}

#[test]
fn test_step_counting_and_reset() {
    let ops = enabled_ops(&[0, 1]);
    for mut strategy in all_strategies() {
        schedule(&mut strategy, &ops, 3);
        strategy.next_boolean(&ops[0], 2);
        strategy.next_integer(&ops[0], 5);
        assert_eq!(strategy.scheduled_steps(), 5, "{}", strategy.description());

        strategy.prepare_for_next_iteration();
        assert_eq!(strategy.scheduled_steps(), 0, "{}", strategy.description());

        schedule(&mut strategy, &ops, 2);
        strategy.reset();
        assert_eq!(strategy.scheduled_steps(), 0, "{}", strategy.description());
    }
}

#[test]
fn test_wait_all_needs_every_dependency() {
    let mut waiter = Operation::new(OperationId::new(0), "waiter");
    waiter.on_created();
    waiter.on_wait_task(&[OperationId::new(1), OperationId::new(2)], true);
    assert_eq!(waiter.status(), OperationStatus::BlockedOnWaitAll);

    assert!(!waiter.try_enable(|id| id == OperationId::new(1)));
    assert_eq!(waiter.status(), OperationStatus::BlockedOnWaitAll);

    assert!(waiter.try_enable(|_| true));
    assert_eq!(waiter.status(), OperationStatus::Enabled);
}

#[test]
fn test_single_delay_forces_one_switch() {
    let ops = enabled_ops(&[0, 1]);
    let mut strategy = DelayBoundingStrategy::new(42, 0, 1);

    // The first iteration only measures the schedule length.
    schedule(&mut strategy, &ops, 10);
    assert!(strategy.prepare_for_next_iteration());

    let picked = schedule(&mut strategy, &ops, 10);
    let mut previous = OperationId::new(0);
    let mut switches = Vec::new();
    for (step, id) in picked.iter().enumerate() {
        if *id != previous {
            switches.push(step);
        }
        previous = *id;
    }
    assert_eq!(switches.len(), 1);
    assert!(switches[0] < 10);
}

#[test]
fn test_combo_hands_off_at_prefix_bound() {
    let ops = enabled_ops(&[0, 1]);
    // Delay bounding without delays sticks to the current operation, DFS
    // always takes the first enabled one.
    let prefix = Strategy::DelayBounding(DelayBoundingStrategy::new(1, 3, 0));
    let suffix = Strategy::Dfs(DfsStrategy::new(0));
    let mut combo = Strategy::combo(prefix, suffix);

    let mut picked = Vec::new();
    for _ in 0..6 {
        picked.push(combo.next_operation(&ops[1], &ops).expect("enabled"));
    }
    let one = OperationId::new(1);
    let zero = OperationId::new(0);
    assert_eq!(picked, vec![one, one, one, zero, zero, zero]);
    assert_eq!(combo.scheduled_steps(), 6);
    assert!(!combo.is_fair());
}

#[test]
fn test_dfs_enumerates_every_schedule_once() {
    let ops = enabled_ops(&[0, 1]);
    let mut strategy = DfsStrategy::new(0);
    let mut seen = Vec::new();
    loop {
        let path = schedule(&mut strategy, &ops, 3);
        assert!(!seen.contains(&path), "duplicate schedule {:?}", path);
        seen.push(path);
        if !strategy.prepare_for_next_iteration() {
            break;
        }
    }
    assert_eq!(seen.len(), 8);
}

#[test]
fn test_fairness_per_strategy() {
    let fairness: Vec<(String, bool)> = all_strategies()
        .into_iter()
        .map(|s| (s.description(), s.is_fair()))
        .collect();
    let fair: Vec<bool> = fairness.iter().map(|(_, fair)| *fair).collect();
    assert_eq!(fair, vec![true, true, true, false, false, false, true, true]);
}
