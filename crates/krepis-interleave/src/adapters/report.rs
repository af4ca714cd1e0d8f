//! Test Reports
//!
//! The `Display` form of [`TestReport`] is what external tooling reads:
//!
//! ```text
//! Testing statistics:
//!   Strategy: PCT[priority change points '2' [3, 7], seed '42']
//!   Found 1 bugs.
//!   Explored 12 schedules: 12 fair and 0 unfair.
//!   Scheduling steps in fair schedules: 9 (min), 14 (avg), 21 (max).
//!   Hit the step bound in 0 schedules.
//!   Distinct states: 31 default, 12 inbox-only, 31 custom, 40 full.
//!   Elapsed 0.041s.
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::scheduler::{BugReport, IterationOutcome};
use crate::domain::state::CoverageCounts;

/// Summary of one iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    /// Iteration index (0-based)
    pub iteration: u64,
    /// How it ended
    pub outcome: IterationOutcome,
    /// Scheduling steps taken
    pub scheduled_steps: usize,
    /// Whether the strategy was fair during the iteration
    pub fair: bool,
    /// Wall-clock time of the iteration
    pub duration: Duration,
}

/// Step statistics of one schedule class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    /// Schedules explored
    pub schedules: u64,
    /// Fewest steps of a schedule
    pub min_steps: usize,
    /// Most steps of a schedule
    pub max_steps: usize,
    /// Steps over all schedules
    pub total_steps: u64,
}

impl StepStats {
    fn record(&mut self, steps: usize) {
        self.min_steps = if self.schedules == 0 {
            steps
        } else {
            self.min_steps.min(steps)
        };
        self.max_steps = self.max_steps.max(steps);
        self.total_steps += steps as u64;
        self.schedules += 1;
    }

    /// Average steps per schedule
    pub fn average_steps(&self) -> u64 {
        self.total_steps.checked_div(self.schedules).unwrap_or(0)
    }
}

/// Result of a whole testing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    /// Description of the strategy at the start of the run
    pub strategy: String,
    /// Bugs found, in discovery order
    pub bugs: Vec<BugReport>,
    /// Fair schedule statistics
    pub fair: StepStats,
    /// Unfair schedule statistics
    pub unfair: StepStats,
    /// Schedules that ended on the step bound
    pub step_bound_hits: u64,
    /// The strategy ran out of schedules before the budget
    pub strategy_exhausted: bool,
    /// Distinct states per abstraction level
    pub coverage: CoverageCounts,
    /// Per-iteration summaries
    pub iterations: Vec<IterationReport>,
    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl TestReport {
    /// Empty report for a run of `strategy`
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            ..Self::default()
        }
    }

    /// Account for a finished iteration
    pub fn record_iteration(&mut self, report: IterationReport) {
        if report.fair {
            self.fair.record(report.scheduled_steps);
        } else {
            self.unfair.record(report.scheduled_steps);
        }
        if report.outcome == IterationOutcome::StepBoundReached {
            self.step_bound_hits += 1;
        }
        self.iterations.push(report);
    }

    /// Keep a bug report
    pub fn add_bug(&mut self, bug: BugReport) {
        self.bugs.push(bug);
    }

    /// Schedules explored, fair and unfair
    pub fn explored_schedules(&self) -> u64 {
        self.fair.schedules + self.unfair.schedules
    }

    /// Number of bugs found
    pub fn num_bugs(&self) -> usize {
        self.bugs.len()
    }

    /// Check if at least one bug was found
    pub fn found_bug(&self) -> bool {
        !self.bugs.is_empty()
    }

    /// First bug found, if any
    pub fn first_bug(&self) -> Option<&BugReport> {
        self.bugs.first()
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Testing statistics:")?;
        writeln!(f, "  Strategy: {}", self.strategy)?;
        writeln!(f, "  Found {} bugs.", self.num_bugs())?;
        writeln!(
            f,
            "  Explored {} schedules: {} fair and {} unfair.",
            self.explored_schedules(),
            self.fair.schedules,
            self.unfair.schedules
        )?;
        for (label, stats) in [("fair", &self.fair), ("unfair", &self.unfair)] {
            if stats.schedules > 0 {
                writeln!(
                    f,
                    "  Scheduling steps in {} schedules: {} (min), {} (avg), {} (max).",
                    label,
                    stats.min_steps,
                    stats.average_steps(),
                    stats.max_steps
                )?;
            }
        }
        writeln!(f, "  Hit the step bound in {} schedules.", self.step_bound_hits)?;
        if self.strategy_exhausted {
            writeln!(f, "  The strategy explored its whole search space.")?;
        }
        writeln!(
            f,
            "  Distinct states: {} default, {} inbox-only, {} custom, {} full.",
            self.coverage.default, self.coverage.inbox_only, self.coverage.custom, self.coverage.full
        )?;
        write!(f, "  Elapsed {:.3}s.", self.elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::scheduler::{BugKind, ScheduleTrace};

    fn iteration(index: u64, steps: usize, fair: bool, outcome: IterationOutcome) -> IterationReport {
        IterationReport {
            iteration: index,
            outcome,
            scheduled_steps: steps,
            fair,
            duration: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_step_statistics() {
        let mut report = TestReport::new("Random[seed '1']");
        report.record_iteration(iteration(0, 10, true, IterationOutcome::Completed));
        report.record_iteration(iteration(1, 4, true, IterationOutcome::StepBoundReached));
        report.record_iteration(iteration(2, 7, false, IterationOutcome::Completed));

        assert_eq!(report.explored_schedules(), 3);
        assert_eq!(report.fair.min_steps, 4);
        assert_eq!(report.fair.max_steps, 10);
        assert_eq!(report.fair.average_steps(), 7);
        assert_eq!(report.unfair.schedules, 1);
        assert_eq!(report.step_bound_hits, 1);
    }

    #[test]
    fn test_display_has_parsed_lines() {
        let mut report = TestReport::new("DFS");
        report.record_iteration(iteration(0, 3, false, IterationOutcome::BugFound(BugKind::Deadlock)));
        report.add_bug(BugReport {
            kind: BugKind::Deadlock,
            message: "Deadlock detected".into(),
            trace: ScheduleTrace::new(),
            scheduled_steps: 3,
            iteration: 0,
            strategy: "DFS".into(),
        });

        let text = report.to_string();
        assert!(text.contains("Explored 1 schedules"));
        assert!(text.contains("Found 1 bugs"));
        assert!(report.found_bug());
        assert_eq!(report.first_bug().map(|b| b.kind), Some(BugKind::Deadlock));
    }

    #[test]
    fn test_report_serializes() {
        let report = TestReport::new("rDPOR");
        let json = serde_json::to_string(&report).expect("serialize");
        let back: TestReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, report);
    }
}
