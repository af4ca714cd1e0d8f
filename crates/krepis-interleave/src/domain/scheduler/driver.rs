//! Operation Scheduler - The Control Loop
//!
//! # Overview
//!
//! The driver owns the operation table and one [`Strategy`] for the length of
//! a single iteration. Every scheduling point funnels through it:
//!
//! ```text
//!   unit reaches a scheduling point
//!        │
//!        ▼
//!   try_enable every waiting operation
//!        │
//!        ├── all completed ─────────────> stop(Completed)
//!        ├── step bound reached ────────> stop(StepBoundReached | bug)
//!        ▼
//!   strategy.next_operation(current, ops)
//!        │
//!        ├── None, someone blocked ─────> stop(BugFound(Deadlock))
//!        ├── liveness violation ────────> stop(BugFound(Liveness))
//!        ▼
//!   record in trace, resume exactly that operation
//! ```
//!
//! The driver is plain data. Parking and waking OS threads is the runtime's
//! business; the driver only says who runs next and when the iteration ends.

use tracing::{debug, warn};

use super::outcome::{BugKind, IterationOutcome};
use super::trace::ScheduleTrace;
use crate::domain::monitor::SharedMonitors;
use crate::domain::operation::{Operation, OperationId, OperationStatus};
use crate::domain::state::{HashedState, StateCoverage};
use crate::domain::strategy::{SchedulingStrategy, Strategy};
use crate::error::{InterleaveError, InterleaveResult};

/// Everything an iteration leaves behind
#[derive(Debug)]
pub struct SchedulerOutput {
    /// The strategy, handed back for the next iteration
    pub strategy: Strategy,
    /// How the iteration ended
    pub outcome: IterationOutcome,
    /// Bug description, when a bug was found
    pub message: Option<String>,
    /// Every decision of the iteration
    pub trace: ScheduleTrace,
    /// Scheduling steps counted by the strategy
    pub scheduled_steps: usize,
    /// States observed at scheduling points
    pub coverage: StateCoverage,
    /// Fatal error that aborted the iteration
    pub error: Option<InterleaveError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Running,
    Stopped(IterationOutcome),
    Aborted,
}

/// Single-iteration control loop
#[derive(Debug)]
pub struct OperationScheduler {
    strategy: Strategy,
    ops: Vec<Operation>,
    current: OperationId,
    trace: ScheduleTrace,
    operation_steps: usize,
    phase: Phase,
    message: Option<String>,
    error: Option<InterleaveError>,
    coverage: StateCoverage,
    monitors: Option<SharedMonitors>,
    depth_bound_is_bug: bool,
}

impl OperationScheduler {
    /// Create a driver around `strategy`
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ops: Vec::new(),
            current: OperationId::new(0),
            trace: ScheduleTrace::new(),
            operation_steps: 0,
            phase: Phase::Running,
            message: None,
            error: None,
            coverage: StateCoverage::new(),
            monitors: None,
            depth_bound_is_bug: false,
        }
    }

    /// Report liveness violations recorded in `monitors`
    pub fn with_monitors(mut self, monitors: SharedMonitors) -> Self {
        self.monitors = Some(monitors);
        self
    }

    /// Treat hitting the step bound as a bug
    pub fn with_depth_bound_as_bug(mut self, enabled: bool) -> Self {
        self.depth_bound_is_bug = enabled;
        self
    }

    /// Accumulate coverage into an existing set
    pub fn with_coverage(mut self, coverage: StateCoverage) -> Self {
        self.coverage = coverage;
        self
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Operation Table
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Register a new operation in status None
    pub fn register(&mut self, name: impl Into<String>) -> OperationId {
        let id = OperationId::new(self.ops.len());
        self.ops.push(Operation::new(id, name));
        id
    }

    /// Mark a registered operation as created (Enabled)
    pub fn create(&mut self, id: OperationId) -> InterleaveResult<()> {
        self.operation_mut(id)?.on_created();
        debug!(op = %id, "operation created");
        Ok(())
    }

    /// Look up an operation
    pub fn operation(&self, id: OperationId) -> InterleaveResult<&Operation> {
        self.ops
            .get(id.as_usize())
            .ok_or(InterleaveError::UnknownOperation(id))
    }

    /// Look up an operation for mutation
    pub fn operation_mut(&mut self, id: OperationId) -> InterleaveResult<&mut Operation> {
        self.ops
            .get_mut(id.as_usize())
            .ok_or(InterleaveError::UnknownOperation(id))
    }

    /// Every operation of the iteration, in id order
    #[inline]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// Operation currently allowed to run
    #[inline]
    pub fn current(&self) -> OperationId {
        self.current
    }

    /// Operation steps taken so far (value choices excluded)
    ///
    /// While an operation runs, `operation_steps() - 1` is the index of the
    /// step that scheduled it.
    #[inline]
    pub fn operation_steps(&self) -> usize {
        self.operation_steps
    }

    /// Check if the iteration is still going
    #[inline]
    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// How the iteration ended, if it did
    pub fn outcome(&self) -> Option<IterationOutcome> {
        match self.phase {
            Phase::Stopped(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Decisions recorded so far
    pub fn trace(&self) -> &ScheduleTrace {
        &self.trace
    }

    /// The strategy driving this iteration
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Store the fingerprint of the current scheduling point
    pub fn record_state(&mut self, state: HashedState) {
        self.coverage.record(&state);
        if let Some(op) = self.ops.get_mut(self.current.as_usize()) {
            op.set_hashed_state(state);
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Scheduling
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Choose the operation that runs next
    ///
    /// Returns `Ok(None)` when the iteration has ended, either before this
    /// call or because of it.
    pub fn schedule_next(&mut self) -> InterleaveResult<Option<OperationId>> {
        if !self.is_running() {
            return Ok(None);
        }
        if self.ops.is_empty() {
            return Err(InterleaveError::EmptyOperationSet);
        }

        self.enable_waiting();

        if self.ops.iter().all(|op| op.status().is_completed()) {
            self.stop(IterationOutcome::Completed);
            return Ok(None);
        }
        if self.check_step_bound() {
            return Ok(None);
        }

        let current = self.operation(self.current)?.clone();
        let next = self.strategy.next_operation(&current, &self.ops);
        if self.check_liveness() {
            return Ok(None);
        }
        if let Some(err) = self.strategy.take_error() {
            return Err(err);
        }

        let Some(next) = next else {
            if self.ops.iter().any(|op| op.status().is_blocked()) {
                let message = self.deadlock_message();
                self.notify_bug(BugKind::Deadlock, message);
            } else {
                self.stop(IterationOutcome::Completed);
            }
            return Ok(None);
        };

        if !self.operation(next)?.is_enabled() {
            return Err(InterleaveError::Runtime(format!(
                "strategy '{}' chose {} which is not enabled",
                self.strategy.description(),
                next
            )));
        }

        debug!(from = %self.current, to = %next, step = self.operation_steps, "scheduled");
        self.trace.push_operation(next);
        self.operation_steps += 1;
        self.current = next;
        Ok(Some(next))
    }

    /// Resolve a controlled boolean choice for the current operation
    pub fn next_boolean(&mut self) -> InterleaveResult<Option<bool>> {
        if !self.is_running() || self.check_step_bound() {
            return Ok(None);
        }
        let current = self.operation(self.current)?.clone();
        let value = self.strategy.next_boolean(&current, 2);
        let value = self.finish_choice(value)?;
        if let Some(value) = value {
            self.trace.push_boolean(value);
        }
        Ok(value)
    }

    /// Resolve a controlled integer choice in `[0, max_value)`
    pub fn next_integer(&mut self, max_value: usize) -> InterleaveResult<Option<usize>> {
        if !self.is_running() || self.check_step_bound() {
            return Ok(None);
        }
        let current = self.operation(self.current)?.clone();
        let value = self.strategy.next_integer(&current, max_value);
        let value = self.finish_choice(value)?;
        if let Some(value) = value {
            self.trace.push_integer(value);
        }
        Ok(value)
    }

    fn finish_choice<T>(&mut self, value: Option<T>) -> InterleaveResult<Option<T>> {
        if self.check_liveness() {
            return Ok(None);
        }
        if let Some(err) = self.strategy.take_error() {
            return Err(err);
        }
        match value {
            Some(value) => Ok(Some(value)),
            None => Err(InterleaveError::Runtime(format!(
                "strategy '{}' returned no value for a controlled choice",
                self.strategy.description()
            ))),
        }
    }

    fn enable_waiting(&mut self) {
        let completed: Vec<bool> = self
            .ops
            .iter()
            .map(|op| op.status().is_completed())
            .collect();
        let is_completed = |id: OperationId| completed.get(id.as_usize()).copied().unwrap_or(false);

        for op in &mut self.ops {
            if op.try_enable(is_completed) {
                debug!(op = %op.id(), "task wait satisfied");
            }
        }
    }

    /// Stop the iteration if the strategy is out of steps
    fn check_step_bound(&mut self) -> bool {
        if !self.strategy.has_reached_max_steps() {
            return false;
        }

        let at_bound = if self.strategy.is_fair() {
            self.monitors
                .as_ref()
                .and_then(|monitors| monitors.lock().check_liveness_at_bound())
        } else {
            None
        };

        if let Some(violation) = at_bound {
            self.notify_bug(BugKind::Liveness, violation.to_string());
        } else if self.depth_bound_is_bug {
            let message = format!(
                "Scheduling steps bound of {} reached",
                self.strategy.scheduled_steps()
            );
            self.notify_bug(BugKind::Assertion, message);
        } else {
            debug!(steps = self.strategy.scheduled_steps(), "step bound reached");
            self.stop(IterationOutcome::StepBoundReached);
        }
        true
    }

    /// Stop the iteration if a monitor overheated during the last decision
    fn check_liveness(&mut self) -> bool {
        let violation = self
            .monitors
            .as_ref()
            .and_then(|monitors| monitors.lock().violation().cloned());
        match violation {
            Some(violation) => {
                self.notify_bug(BugKind::Liveness, violation.to_string());
                true
            }
            None => false,
        }
    }

    /// Describe who is stuck on what
    pub fn deadlock_message(&self) -> String {
        let names = |status: OperationStatus| -> Vec<String> {
            self.ops
                .iter()
                .filter(|op| op.status() == status)
                .map(|op| format!("'{}'", op.name()))
                .collect()
        };

        let mut parts = Vec::new();
        let receiving = names(OperationStatus::BlockedOnReceive);
        if !receiving.is_empty() {
            parts.push(format!("{} waiting to receive an event", receiving.join(", ")));
        }
        let mut joining = names(OperationStatus::BlockedOnWaitAll);
        joining.extend(names(OperationStatus::BlockedOnWaitAny));
        if !joining.is_empty() {
            parts.push(format!("{} waiting for tasks to complete", joining.join(", ")));
        }
        let acquiring: Vec<String> = self
            .ops
            .iter()
            .filter(|op| op.status() == OperationStatus::BlockedOnResource)
            .map(|op| match op.awaited_resource() {
                Some(resource) => format!("'{}' waiting to acquire {}", op.name(), resource),
                None => format!("'{}' waiting to acquire a resource", op.name()),
            })
            .collect();
        parts.extend(acquiring);

        format!("Deadlock detected: {}.", parts.join("; "))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Ending the Iteration
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Record a bug and halt the iteration
    ///
    /// Only the first bug of an iteration is kept.
    pub fn notify_bug(&mut self, kind: BugKind, message: impl Into<String>) {
        if !self.is_running() {
            return;
        }
        let message = message.into();
        warn!(%kind, steps = self.strategy.scheduled_steps(), "{}", message);
        self.message = Some(message);
        self.strategy.notify_bug_found();
        self.stop(IterationOutcome::BugFound(kind));
    }

    /// Halt the iteration with `outcome`
    pub fn stop(&mut self, outcome: IterationOutcome) {
        if self.is_running() {
            self.phase = Phase::Stopped(outcome);
        }
    }

    /// Halt the iteration because of a fatal error
    pub fn abort(&mut self, error: InterleaveError) {
        warn!(%error, "iteration aborted");
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.phase = Phase::Aborted;
    }

    /// Tear down and hand the strategy back
    pub fn finish(self) -> SchedulerOutput {
        let outcome = match self.phase {
            Phase::Stopped(outcome) => outcome,
            Phase::Running | Phase::Aborted => IterationOutcome::Completed,
        };
        SchedulerOutput {
            scheduled_steps: self.strategy.scheduled_steps(),
            strategy: self.strategy,
            outcome,
            message: self.message,
            trace: self.trace,
            coverage: self.coverage,
            error: self.error,
        }
    }
}
