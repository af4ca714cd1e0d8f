//! Testing Engine
//!
//! # Overview
//!
//! Runs a program under test many times, each time under a different
//! interleaving chosen by one [`Strategy`]:
//!
//! ```text
//!   TestConfig ──> create_strategy ──> Strategy
//!                                         │
//!        ┌────────────────────────────────┘
//!        ▼
//!   ┌─ iteration ─────────────────────────────────────┐
//!   │ OperationScheduler::new(strategy)                │
//!   │ ControlledRuntime::run(program)                  │
//!   │   └─> SchedulerOutput { strategy, outcome, .. }  │
//!   └──────────────────────────────────────────────────┘
//!        │ bug? ──> BugReport (stop on first bug)
//!        ▼
//!   strategy.prepare_for_next_iteration() == false ──> exhausted
//! ```
//!
//! The engine owns the strategy between iterations and lends it to exactly
//! one driver at a time. Nothing is global.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::{StrategyConfig, TestConfig};
use super::report::{IterationReport, TestReport};
use crate::domain::monitor::{MonitorId, MonitorRegistry, SharedMonitors};
use crate::domain::random::derive_seed;
use crate::domain::scheduler::{BugReport, IterationOutcome, OperationScheduler, ScheduleTrace};
use crate::domain::state::{StateCoverage, StateHasher};
use crate::domain::strategy::{
    DelayBoundingStrategy, DfsStrategy, DporStrategy, GreedyRandomStrategy, PctStrategy,
    ProbabilisticRandomStrategy, QLearningStrategy, RandomStrategy, ReplayStrategy,
    SchedulingStrategy, Strategy,
};
use crate::error::{ExecutionResult, InterleaveResult};
use crate::infrastructure::runtime::{ControlledRuntime, OperationContext};

/// Drives a program through many controlled iterations
///
/// # Example
///
/// ```rust
/// use krepis_interleave::{Message, TestConfig, TestingEngine};
/// use krepis_interleave::domain::operation::EventType;
///
/// let engine = TestingEngine::new(TestConfig::default().with_iterations(10)).unwrap();
/// let report = engine
///     .run(|ctx| {
///         let main = ctx.id();
///         ctx.spawn("ping", move |ctx| ctx.send(main, Message::signal(EventType::new(1))))?;
///         ctx.receive(&[EventType::new(1)])?;
///         Ok(())
///     })
///     .unwrap();
/// assert!(!report.found_bug());
/// ```
pub struct TestingEngine {
    config: TestConfig,
    monitors: MonitorRegistry,
    hasher: Option<Arc<dyn StateHasher>>,
}

impl TestingEngine {
    /// Create an engine, rejecting invalid configurations
    pub fn new(config: TestConfig) -> InterleaveResult<Self> {
        config.validate()?;
        let monitors = MonitorRegistry::new(config.effective_temperature_threshold());
        Ok(Self {
            config,
            monitors,
            hasher: None,
        })
    }

    /// The configuration in use
    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Register a liveness monitor the program can heat and cool
    pub fn register_monitor(&mut self, name: impl Into<String>) -> MonitorId {
        self.monitors.register(name)
    }

    /// Fingerprint program states through `hasher` instead of the runtime's own view
    pub fn with_state_hasher(mut self, hasher: Arc<dyn StateHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Strategy Construction
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Build the configured strategy without the liveness decorator
    ///
    /// Fair strategies get `max_fair_steps`, unfair ones `max_unfair_steps`.
    pub fn create_strategy(&self) -> Strategy {
        self.build(&self.config.strategy, self.config.seed)
    }

    fn build(&self, selection: &StrategyConfig, seed: u64) -> Strategy {
        let config = &self.config;
        let fair = config.max_fair_steps;
        let unfair = config.max_unfair_steps;
        match selection {
            StrategyConfig::Random => Strategy::Random(RandomStrategy::new(seed, fair)),
            StrategyConfig::Probabilistic { coin_flips } => Strategy::ProbabilisticRandom(
                ProbabilisticRandomStrategy::new(seed, fair, *coin_flips),
            ),
            StrategyConfig::Pct { change_points } => {
                Strategy::Pct(PctStrategy::new(seed, fair, *change_points))
            }
            StrategyConfig::FairPct { change_points } => Strategy::combo(
                Strategy::Pct(PctStrategy::new(seed, unfair, *change_points)),
                Strategy::Random(RandomStrategy::new(suffix_seed(seed), fair)),
            ),
            StrategyConfig::DelayBounding { max_delays } => Strategy::DelayBounding(
                DelayBoundingStrategy::new(seed, unfair, *max_delays)
                    .with_abstraction(config.abstraction_level),
            ),
            StrategyConfig::IterativeDelayBounding { initial_delays } => Strategy::DelayBounding(
                DelayBoundingStrategy::iterative(seed, unfair, *initial_delays)
                    .with_abstraction(config.abstraction_level),
            ),
            StrategyConfig::Dfs => Strategy::Dfs(DfsStrategy::new(unfair)),
            StrategyConfig::Dpor => Strategy::Dpor(DporStrategy::new(unfair)),
            StrategyConfig::RandomDpor => Strategy::Dpor(DporStrategy::random(
                seed,
                unfair,
                config.race_reversal_limit,
            )),
            StrategyConfig::QLearning => Strategy::QLearning(QLearningStrategy::new(
                seed,
                fair,
                config.abstraction_level,
            )),
            StrategyConfig::GreedyRandom => Strategy::GreedyRandom(GreedyRandomStrategy::new(
                seed,
                fair,
                config.abstraction_level,
            )),
            StrategyConfig::Combo { prefix, suffix } => {
                Strategy::combo(self.build(prefix, seed), self.build(suffix, suffix_seed(seed)))
            }
        }
    }

    fn shared_monitors(&self) -> SharedMonitors {
        let mut registry = self.monitors.clone();
        registry.set_threshold(self.config.effective_temperature_threshold());
        registry.into_shared()
    }

    fn decorate(&self, strategy: Strategy, monitors: &SharedMonitors) -> Strategy {
        if self.monitors.is_empty() {
            strategy
        } else {
            strategy.with_liveness(Arc::clone(monitors))
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Running
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Explore `program` for up to `iterations` schedules
    ///
    /// Bugs end up in the report. Only internal inconsistencies, such as a
    /// diverging replay, are returned as errors.
    pub fn run<F>(&self, program: F) -> InterleaveResult<TestReport>
    where
        F: Fn(&OperationContext) -> ExecutionResult<()> + Send + Sync + 'static,
    {
        let monitors = self.shared_monitors();
        let strategy = self.decorate(self.create_strategy(), &monitors);
        self.explore(strategy, monitors, self.config.iterations, Arc::new(program))
    }

    /// Re-run `program` once under the decisions recorded in `trace`
    ///
    /// A trace taken from a [`BugReport`] reproduces the same bug.
    pub fn replay<F>(&self, trace: &ScheduleTrace, program: F) -> InterleaveResult<TestReport>
    where
        F: Fn(&OperationContext) -> ExecutionResult<()> + Send + Sync + 'static,
    {
        let fair = self.create_strategy().is_fair();
        let max_steps = if fair {
            self.config.max_fair_steps
        } else {
            self.config.max_unfair_steps
        };
        let replay = Strategy::Replay(ReplayStrategy::new(trace.clone(), max_steps, fair));
        let monitors = self.shared_monitors();
        let strategy = self.decorate(replay, &monitors);
        self.explore(strategy, monitors, 1, Arc::new(program))
    }

    fn explore<F>(
        &self,
        mut strategy: Strategy,
        monitors: SharedMonitors,
        budget: u64,
        program: Arc<F>,
    ) -> InterleaveResult<TestReport>
    where
        F: Fn(&OperationContext) -> ExecutionResult<()> + Send + Sync + 'static,
    {
        let started = Instant::now();
        let mut report = TestReport::new(strategy.description());
        let mut coverage = StateCoverage::new();
        info!(strategy = %report.strategy, iterations = budget, "starting testing run");

        for iteration in 0..budget {
            monitors.lock().reset_for_iteration();
            let description = strategy.description();
            let iteration_started = Instant::now();

            let driver = OperationScheduler::new(strategy)
                .with_monitors(Arc::clone(&monitors))
                .with_depth_bound_as_bug(self.config.consider_depth_bound_hit_as_bug)
                .with_coverage(coverage);
            let runtime =
                ControlledRuntime::with_state_hasher(driver, Arc::clone(&monitors), self.hasher.clone());
            let body = Arc::clone(&program);
            let output = runtime.run(move |ctx| body(ctx))?;

            if let Some(error) = output.error {
                warn!(iteration, %error, "iteration aborted");
                return Err(error);
            }

            strategy = output.strategy;
            coverage = output.coverage;
            report.record_iteration(IterationReport {
                iteration,
                outcome: output.outcome,
                scheduled_steps: output.scheduled_steps,
                fair: strategy.is_fair(),
                duration: iteration_started.elapsed(),
            });
            debug!(iteration, outcome = %output.outcome, steps = output.scheduled_steps, "iteration finished");

            if let IterationOutcome::BugFound(kind) = output.outcome {
                report.add_bug(BugReport {
                    kind,
                    message: output.message.unwrap_or_else(|| kind.to_string()),
                    trace: output.trace,
                    scheduled_steps: output.scheduled_steps,
                    iteration,
                    strategy: description,
                });
                if self.config.stop_on_first_bug {
                    break;
                }
            }

            if iteration + 1 < budget && !strategy.prepare_for_next_iteration() {
                info!(iteration, "strategy explored its whole search space");
                report.strategy_exhausted = true;
                break;
            }
        }

        report.coverage = coverage.counts();
        report.elapsed = started.elapsed();
        info!(
            schedules = report.explored_schedules(),
            bugs = report.num_bugs(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "testing run finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for TestingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestingEngine")
            .field("config", &self.config)
            .field("monitors", &self.monitors.len())
            .field("custom_hasher", &self.hasher.is_some())
            .finish()
    }
}

/// Seed of the second half of a combination
///
/// Strategies reseed with `derive_seed(seed, iteration)`; the last stream is
/// never reached by an iteration counter.
const fn suffix_seed(seed: u64) -> u64 {
    derive_seed(seed, u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scheduler::BugKind;

    fn engine(strategy: &str) -> TestingEngine {
        let config = TestConfig::default()
            .with_strategy(strategy.parse().expect("valid strategy"))
            .with_max_steps(100, 1_000);
        TestingEngine::new(config).expect("valid config")
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = TestingEngine::new(TestConfig::default().with_iterations(0));
        assert!(matches!(result, Err(err) if err.is_config_error()));
    }

    #[test]
    fn test_strategy_fairness_follows_selection() {
        assert!(engine("random").create_strategy().is_fair());
        assert!(engine("pct:3").create_strategy().is_fair());
        assert!(engine("greedy").create_strategy().is_fair());
        assert!(engine("fairpct:3").create_strategy().is_fair());
        assert!(!engine("db:2").create_strategy().is_fair());
        assert!(!engine("dpor").create_strategy().is_fair());
        assert!(!engine("rdpor").create_strategy().is_fair());
        assert!(!engine("combo:random+dfs").create_strategy().is_fair());
    }

    #[test]
    fn test_step_bounds_follow_fairness() {
        let fair = engine("random").create_strategy();
        let unfair = engine("dfs").create_strategy();
        assert!(fair.description().starts_with("Random"));
        assert_eq!(unfair.description(), "DFS");
    }

    #[test]
    fn test_combination_halves_use_distinct_seeds() {
        let config = TestConfig::default()
            .with_strategy("combo:random+random".parse().expect("valid strategy"))
            .with_seed(3);
        let engine = TestingEngine::new(config).expect("valid config");
        let expected = format!(
            "Combo[Random[seed '3'],Random[seed '{}']]",
            derive_seed(3, u64::MAX)
        );
        assert_eq!(engine.create_strategy().description(), expected);
        assert_ne!(derive_seed(3, u64::MAX), 3);
    }

    #[test]
    fn test_run_without_bug() {
        let report = engine("random")
            .run(|ctx| {
                let child = ctx.spawn("child", |ctx| ctx.yield_now())?;
                ctx.join(&[child])
            })
            .expect("run succeeds");
        assert_eq!(report.explored_schedules(), 100);
        assert!(!report.found_bug());
    }

    #[test]
    fn test_run_stops_on_first_bug() {
        let report = engine("random")
            .run(|ctx| ctx.assert(false, "always fails"))
            .expect("run succeeds");
        assert_eq!(report.explored_schedules(), 1);
        assert_eq!(report.num_bugs(), 1);
        assert_eq!(report.bugs[0].kind, BugKind::Assertion);
        assert_eq!(report.bugs[0].iteration, 0);
    }

    #[test]
    fn test_run_collects_every_bug() {
        let config = TestConfig::default()
            .with_iterations(5)
            .with_stop_on_first_bug(false);
        let engine = TestingEngine::new(config).expect("valid config");
        let report = engine
            .run(|ctx| ctx.assert(false, "always fails"))
            .expect("run succeeds");
        assert_eq!(report.num_bugs(), 5);
    }

    #[test]
    fn test_dfs_reports_exhaustion() {
        let report = engine("dfs")
            .run(|ctx| {
                let child = ctx.spawn("child", |ctx| ctx.yield_now())?;
                ctx.yield_now()?;
                ctx.join(&[child])
            })
            .expect("run succeeds");
        assert!(report.strategy_exhausted);
        assert!(report.explored_schedules() < 100);
    }
}
