//! Strategy Benchmark Suite
//!
//! # Scenarios
//!
//! 1. **Decision cost**: raw `next_operation` calls against a fixed table
//!    of enabled operations, no threads involved
//!    - Measures per-decision overhead of each strategy
//!
//! 2. **AB-BA Deadlock**: whole engine runs of a lock-order inversion
//!    - Includes thread parking and state fingerprinting
//!    - Random and PCT sample, DPOR explores exhaustively
//!
//! 3. **Dining Philosophers**: scalability of exhaustive DPOR
//!    - N=2: Baseline
//!    - N=3: Search space grows quickly

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use krepis_interleave::domain::operation::{Operation, OperationId};
use krepis_interleave::domain::strategy::{
    DelayBoundingStrategy, DporStrategy, GreedyRandomStrategy, PctStrategy,
    ProbabilisticRandomStrategy, QLearningStrategy, RandomStrategy,
};
use krepis_interleave::{
    AbstractionLevel, ExecutionResult, OperationContext, SchedulingStrategy, Strategy, TestConfig,
    TestingEngine,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn enabled_ops(n: usize) -> Vec<Operation> {
    (0..n)
        .map(|i| {
            let mut op = Operation::new(OperationId::new(i), format!("op{}", i));
            op.on_created();
            op
        })
        .collect()
}

fn strategies() -> Vec<(&'static str, Strategy)> {
    vec![
        ("random", Strategy::Random(RandomStrategy::new(1, 0))),
        (
            "prob",
            Strategy::ProbabilisticRandom(ProbabilisticRandomStrategy::new(1, 0, 3)),
        ),
        ("pct", Strategy::Pct(PctStrategy::new(1, 0, 10))),
        ("db", Strategy::DelayBounding(DelayBoundingStrategy::new(1, 0, 10))),
        ("dpor", Strategy::Dpor(DporStrategy::new(0))),
        (
            "rl",
            Strategy::QLearning(QLearningStrategy::new(1, 0, AbstractionLevel::Default)),
        ),
        (
            "greedy",
            Strategy::GreedyRandom(GreedyRandomStrategy::new(1, 0, AbstractionLevel::Default)),
        ),
    ]
}

fn abba(ctx: &OperationContext) -> ExecutionResult<()> {
    let a = ctx.create_resource()?;
    let b = ctx.create_resource()?;
    let worker = ctx.spawn("worker", move |ctx| {
        ctx.acquire(b)?;
        ctx.acquire(a)?;
        ctx.release(a)?;
        ctx.release(b)
    })?;
    ctx.acquire(a)?;
    ctx.acquire(b)?;
    ctx.release(b)?;
    ctx.release(a)?;
    ctx.join(&[worker])
}

fn philosophers(n: usize) -> impl Fn(&OperationContext) -> ExecutionResult<()> + Send + Sync + 'static {
    move |ctx| {
        let forks = (0..n)
            .map(|_| ctx.create_resource())
            .collect::<ExecutionResult<Vec<_>>>()?;
        let mut diners = Vec::with_capacity(n);
        for i in 0..n {
            // The last philosopher picks up forks in the other order.
            let (first, second) = if i + 1 == n {
                (forks[0], forks[i])
            } else {
                (forks[i], forks[i + 1])
            };
            diners.push(ctx.spawn(&format!("philosopher-{}", i), move |ctx| {
                ctx.acquire(first)?;
                ctx.acquire(second)?;
                ctx.release(second)?;
                ctx.release(first)
            })?);
        }
        ctx.join(&diners)
    }
}

fn engine(strategy: &str, iterations: u64) -> TestingEngine {
    let config = TestConfig::default()
        .with_strategy(strategy.parse().expect("valid strategy"))
        .with_iterations(iterations)
        .with_stop_on_first_bug(false)
        .with_max_steps(1_000, 10_000);
    TestingEngine::new(config).expect("valid config")
}

// ============================================================================
// Benchmarks
// ============================================================================

/// Benchmark raw decision cost
fn bench_decisions(c: &mut Criterion) {
    let mut group = c.benchmark_group("decisions");
    let ops = enabled_ops(8);

    for (name, strategy) in strategies() {
        let mut strategy = strategy;
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut current = OperationId::new(0);
                for _ in 0..100 {
                    current = strategy
                        .next_operation(&ops[current.as_usize()], &ops)
                        .expect("enabled operation");
                }
                strategy.prepare_for_next_iteration();
                black_box(current)
            });
        });
    }

    group.finish();
}

/// Benchmark AB-BA Deadlock scenario
fn bench_abba_deadlock(c: &mut Criterion) {
    let mut group = c.benchmark_group("abba_deadlock");
    group.sample_size(10);

    for strategy in ["random", "pct:2", "dpor"] {
        group.bench_function(strategy, |b| {
            let engine = engine(strategy, 20);
            b.iter(|| {
                let report = engine.run(abba).expect("run succeeds");
                black_box(report.num_bugs())
            });
        });
    }

    group.finish();
}

/// Benchmark Dining Philosophers with exhaustive DPOR
fn bench_dining_philosophers(c: &mut Criterion) {
    let mut group = c.benchmark_group("dining_philosophers");
    group.sample_size(10);

    for n in [2, 3].iter() {
        group.bench_with_input(BenchmarkId::new("dpor", n), n, |b, &n| {
            let engine = engine("dpor", 10_000);
            b.iter(|| {
                let report = engine.run(philosophers(n)).expect("run succeeds");
                black_box(report.explored_schedules())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_decisions,
    bench_abba_deadlock,
    bench_dining_philosophers
);

criterion_main!(benches);
