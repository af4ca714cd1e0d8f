//! Temperature-Checking Decorator
//!
//! Wraps any strategy and, before forwarding each decision, raises the
//! temperature of every hot liveness monitor. Checks only happen while the
//! wrapped strategy is fair.
//!
//! Once a violation is recorded no decision is forwarded: the wrapped
//! strategy neither counts the step nor consumes randomness, so the trace
//! of the failing run ends exactly where the bug was reported.

use tracing::warn;

use super::{SchedulingStrategy, Strategy};
use crate::domain::monitor::SharedMonitors;
use crate::domain::operation::{Operation, OperationId};
use crate::error::InterleaveError;

/// Liveness-checking wrapper around a base strategy
#[derive(Debug)]
pub struct TemperatureCheckingStrategy {
    inner: Strategy,
    monitors: SharedMonitors,
}

impl TemperatureCheckingStrategy {
    /// Wrap `inner`, checking the monitors in `monitors`
    pub fn new(inner: Strategy, monitors: SharedMonitors) -> Self {
        Self { inner, monitors }
    }

    /// The wrapped strategy
    pub fn inner(&self) -> &Strategy {
        &self.inner
    }

    /// Unwrap the decorator
    pub fn into_inner(self) -> Strategy {
        self.inner
    }

    /// Heat the hot monitors, returning `true` once a violation is recorded
    fn check_liveness_temperature(&self) -> bool {
        if !self.inner.is_fair() {
            return false;
        }
        let mut registry = self.monitors.lock();
        if registry.violation().is_some() {
            return true;
        }
        match registry.check_liveness_temperature() {
            Some(violation) => {
                warn!(%violation, "liveness temperature exceeded");
                true
            }
            None => false,
        }
    }
}

impl SchedulingStrategy for TemperatureCheckingStrategy {
    fn next_operation(&mut self, current: &Operation, ops: &[Operation]) -> Option<OperationId> {
        if self.check_liveness_temperature() {
            return None;
        }
        self.inner.next_operation(current, ops)
    }

    fn next_boolean(&mut self, current: &Operation, max_value: usize) -> Option<bool> {
        if self.check_liveness_temperature() {
            return None;
        }
        self.inner.next_boolean(current, max_value)
    }

    fn next_integer(&mut self, current: &Operation, max_value: usize) -> Option<usize> {
        if self.check_liveness_temperature() {
            return None;
        }
        self.inner.next_integer(current, max_value)
    }

    fn notify_bug_found(&mut self) {
        self.inner.notify_bug_found();
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.inner.prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn scheduled_steps(&self) -> usize {
        self.inner.scheduled_steps()
    }

    fn has_reached_max_steps(&self) -> bool {
        self.inner.has_reached_max_steps()
    }

    fn is_fair(&self) -> bool {
        self.inner.is_fair()
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    fn take_error(&mut self) -> Option<InterleaveError> {
        self.inner.take_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::monitor::MonitorRegistry;
    use crate::domain::strategy::testing::enabled_ops;
    use crate::domain::strategy::{DfsStrategy, RandomStrategy};

    #[test]
    fn test_fair_strategy_heats_monitors() {
        let mut registry = MonitorRegistry::new(2);
        let id = registry.register("progress");
        registry.set_hot(id);
        let monitors = registry.into_shared();

        let inner = Strategy::Random(RandomStrategy::new(1, 0));
        let mut strategy = TemperatureCheckingStrategy::new(inner, monitors.clone());
        let ops = enabled_ops(2);

        for _ in 0..3 {
            strategy.next_operation(&ops[0], &ops);
        }
        assert_eq!(monitors.lock().checks(), 3);
        assert!(monitors.lock().violation().is_some());
    }

    #[test]
    fn test_violation_stops_forwarding() {
        let mut registry = MonitorRegistry::new(2);
        let id = registry.register("progress");
        registry.set_hot(id);
        let monitors = registry.into_shared();

        let inner = Strategy::Random(RandomStrategy::new(1, 0));
        let mut strategy = TemperatureCheckingStrategy::new(inner, monitors);
        let ops = enabled_ops(2);

        assert!(strategy.next_operation(&ops[0], &ops).is_some());
        assert!(strategy.next_operation(&ops[0], &ops).is_some());
        assert_eq!(strategy.next_operation(&ops[0], &ops), None);
        assert_eq!(strategy.next_boolean(&ops[0], 2), None);
        assert_eq!(strategy.next_integer(&ops[0], 4), None);
        assert_eq!(strategy.scheduled_steps(), 2);
    }

    #[test]
    fn test_unfair_strategy_never_checks() {
        let mut registry = MonitorRegistry::new(0);
        let id = registry.register("progress");
        registry.set_hot(id);
        let monitors = registry.into_shared();

        let inner = Strategy::Dfs(DfsStrategy::new(0));
        let mut strategy = TemperatureCheckingStrategy::new(inner, monitors.clone());
        let ops = enabled_ops(2);

        for _ in 0..10 {
            strategy.next_operation(&ops[0], &ops);
            strategy.next_boolean(&ops[0], 2);
        }
        assert_eq!(monitors.lock().checks(), 0);
        assert!(monitors.lock().violation().is_none());
    }

    #[test]
    fn test_decorator_is_transparent() {
        let monitors = MonitorRegistry::new(5).into_shared();
        let inner = Strategy::Random(RandomStrategy::new(3, 10));
        let strategy = TemperatureCheckingStrategy::new(inner, monitors);
        assert!(strategy.is_fair());
        assert_eq!(strategy.description(), "Random[seed '3']");
    }
}
