//! Controlled Runtime - One OS Thread per Operation, One Runner at a Time
//!
//! # Overview
//!
//! Every operation of the program under test runs on its own OS thread, but
//! only the operation the driver picked is ever allowed past a scheduling
//! point. Everyone else is parked on a single condition variable.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────────── Shared ────────────────────────┐
//!   │  Mutex<RuntimeState>                                   │
//!   │    ├─ OperationScheduler (driver + strategy)           │
//!   │    ├─ inboxes[op]   VecDeque<Envelope>                 │
//!   │    ├─ resources[r]  holder                             │
//!   │    └─ live thread count, join handles                  │
//!   │  Condvar turn          (notify_all on every decision)  │
//!   │  DashMap<ThreadId, OperationId>   controlled threads   │
//!   └────────────────────────────────────────────────────────┘
//!          ▲                ▲                 ▲
//!     op thread 0      op thread 1       op thread N
//!     (running)        (parked)          (parked)
//! ```
//!
//! # Scheduling Point Protocol
//!
//! 1. Lock the state and check that the caller is the current operation
//!    on a controlled thread.
//! 2. Describe the next step on the caller's [`Operation`] and record the
//!    state fingerprint.
//! 3. Ask the driver for the next operation, then `notify_all`.
//! 4. Wait until the caller is current and enabled again, or the iteration
//!    stopped, in which case `Err(ExecutionCanceled)` is returned.
//!
//! Because the lock is held from step 1 to the wait, a thread that is still
//! unwinding from a canceled primitive can never observe a half-made
//! decision.
//!
//! [`Operation`]: crate::domain::operation::Operation

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::monitor::{MonitorId, SharedMonitors};
use crate::domain::operation::{
    EventType, Operation, OperationId, OperationTarget, OperationType, ResourceId,
};
use crate::domain::scheduler::{BugKind, OperationScheduler, SchedulerOutput};
use crate::domain::state::{Fingerprint, HashedState, StateHasher};
use crate::error::{CancelReason, ExecutionCanceled, ExecutionResult, InterleaveError};

/// Body of a spawned operation
pub type TaskBody = Box<dyn FnOnce(&OperationContext) -> ExecutionResult<()> + Send + 'static>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message delivered to an operation's inbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Event type used to match blocked receives
    pub event: u64,
    /// Arbitrary payload
    pub payload: serde_json::Value,
}

impl Message {
    /// Create a message with a payload
    pub fn new(event: EventType, payload: impl Into<serde_json::Value>) -> Self {
        Self {
            event: event.as_u64(),
            payload: payload.into(),
        }
    }

    /// Create a payload-less message
    pub fn signal(event: EventType) -> Self {
        Self::new(event, serde_json::Value::Null)
    }

    /// Event type of the message
    pub fn event_type(&self) -> EventType {
        EventType::new(self.event)
    }
}

#[derive(Debug)]
struct Envelope {
    message: Message,
    sender: OperationId,
    send_step: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RuntimeState {
    driver: Option<OperationScheduler>,
    inboxes: Vec<VecDeque<Envelope>>,
    resources: Vec<Option<OperationId>>,
    handles: Vec<JoinHandle<()>>,
    live_threads: usize,
}

impl RuntimeState {
    /// The driver, or a cancellation once the iteration was torn down
    fn driver(&mut self) -> ExecutionResult<&mut OperationScheduler> {
        self.driver.as_mut().ok_or_else(ExecutionCanceled::stopped)
    }

    fn register(&mut self, name: &str) -> ExecutionResult<OperationId> {
        let id = self.driver()?.register(name);
        self.inboxes.push(VecDeque::new());
        Ok(id)
    }

    fn take_message(&mut self, id: OperationId, events: &[EventType]) -> Option<Envelope> {
        let inbox = self.inboxes.get_mut(id.as_usize())?;
        let position = inbox.iter().position(|envelope| {
            events.is_empty() || events.contains(&envelope.message.event_type())
        })?;
        inbox.remove(position)
    }

    /// Fingerprint of the runtime's own observable state
    fn fingerprint(&self) -> HashedState {
        let Some(driver) = self.driver.as_ref() else {
            return HashedState::default();
        };

        let mut tasks = Fingerprint::new();
        for op in driver.operations() {
            tasks
                .write(&op.status())
                .write(&op.op_type())
                .write(&op.target())
                .write(&op.target_id());
        }

        let mut inboxes = Fingerprint::new();
        for inbox in &self.inboxes {
            inboxes.write(&inbox.len());
            for envelope in inbox {
                inboxes.write(&envelope.message.event);
            }
        }

        let mut resources = Fingerprint::new();
        resources.write(&self.resources);

        let mut full = Fingerprint::new();
        full.write(&tasks.finish())
            .write(&inboxes.finish())
            .write(&resources.finish());
        for inbox in &self.inboxes {
            for envelope in inbox {
                full.write(&envelope.sender).write(&envelope.message.payload.to_string());
            }
        }

        let mut custom = Fingerprint::new();
        custom.write(&tasks.finish()).write(&resources.finish());

        HashedState {
            default: tasks.finish(),
            inbox_only: inboxes.finish(),
            custom: custom.finish(),
            full: full.finish(),
        }
    }
}

struct Shared {
    state: Mutex<RuntimeState>,
    turn: Condvar,
    threads: DashMap<ThreadId, OperationId>,
    monitors: SharedMonitors,
    hasher: Option<Arc<dyn StateHasher>>,
}

impl Shared {
    fn capture_state(&self, state: &RuntimeState) -> HashedState {
        match &self.hasher {
            Some(hasher) => HashedState::capture(hasher.as_ref()),
            None => state.fingerprint(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hosts one iteration of the program under test
pub struct ControlledRuntime {
    shared: Arc<Shared>,
}

impl ControlledRuntime {
    /// Create a runtime around a fresh driver
    pub fn new(driver: OperationScheduler, monitors: SharedMonitors) -> Self {
        Self::with_state_hasher(driver, monitors, None)
    }

    /// Create a runtime that fingerprints states through `hasher`
    pub fn with_state_hasher(
        driver: OperationScheduler,
        monitors: SharedMonitors,
        hasher: Option<Arc<dyn StateHasher>>,
    ) -> Self {
        let state = RuntimeState {
            driver: Some(driver),
            inboxes: Vec::new(),
            resources: Vec::new(),
            handles: Vec::new(),
            live_threads: 0,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                turn: Condvar::new(),
                threads: DashMap::new(),
                monitors,
                hasher,
            }),
        }
    }

    /// Run `main` as operation 0 until the iteration ends
    pub fn run<F>(self, main: F) -> Result<SchedulerOutput, InterleaveError>
    where
        F: FnOnce(&OperationContext) -> ExecutionResult<()> + Send + 'static,
    {
        let mut state = self.shared.state.lock();

        let started = state.register("main").and_then(|id| {
            let driver = state.driver()?;
            if let Err(err) = driver.create(id) {
                driver.abort(err);
            }
            Ok(id)
        });
        if let Ok(id) = started {
            if let Err(err) = spawn_operation(&self.shared, &mut state, id, "main", Box::new(main)) {
                if let Ok(driver) = state.driver() {
                    driver.abort(err);
                }
            }
        }

        while state.live_threads > 0 {
            self.shared.turn.wait(&mut state);
        }

        let handles = std::mem::take(&mut state.handles);
        let driver = state.driver.take();
        drop(state);

        for handle in handles {
            if handle.join().is_err() {
                debug!("operation thread terminated abnormally");
            }
        }

        driver
            .map(OperationScheduler::finish)
            .ok_or_else(|| InterleaveError::Runtime("iteration driver already finished".into()))
    }
}

impl fmt::Debug for ControlledRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlledRuntime")
            .field("threads", &self.shared.threads.len())
            .finish()
    }
}

fn spawn_operation(
    shared: &Arc<Shared>,
    state: &mut RuntimeState,
    id: OperationId,
    name: &str,
    body: TaskBody,
) -> Result<(), InterleaveError> {
    let ctx = OperationContext {
        shared: Arc::clone(shared),
        id,
    };
    let handle = thread::Builder::new()
        .name(format!("interleave-{}", name))
        .spawn(move || ctx.run_operation(body))
        .map_err(|err| InterleaveError::Runtime(format!("failed to spawn '{}': {}", name, err)))?;
    state.handles.push(handle);
    state.live_threads += 1;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operation Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle through which an operation reaches the controlled primitives
///
/// Every primitive returns [`ExecutionResult`]. Once the iteration stops,
/// every call returns `Err(ExecutionCanceled)`; propagate it with `?`.
///
/// # Example
///
/// ```rust
/// use krepis_interleave::infrastructure::runtime::OperationContext;
/// use krepis_interleave::error::ExecutionResult;
///
/// fn worker(ctx: &OperationContext) -> ExecutionResult<()> {
///     let lock = ctx.create_resource()?;
///     ctx.acquire(lock)?;
///     ctx.yield_now()?;
///     ctx.release(lock)
/// }
/// ```
#[derive(Clone)]
pub struct OperationContext {
    shared: Arc<Shared>,
    id: OperationId,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext").field("id", &self.id).finish()
    }
}

impl OperationContext {
    /// Id of the operation this context belongs to
    #[inline]
    pub fn id(&self) -> OperationId {
        self.id
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Tasks
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create a new operation running `body`
    pub fn spawn<F>(&self, name: &str, body: F) -> ExecutionResult<OperationId>
    where
        F: FnOnce(&OperationContext) -> ExecutionResult<()> + Send + 'static,
    {
        let mut state = self.enter()?;
        let child = state.register(name)?;
        self.scheduling_point(&mut state, OperationType::Create, OperationTarget::Task, child.as_usize())?;

        if let Err(err) = state.driver()?.create(child) {
            return Err(self.fail(&mut state, err));
        }
        if let Err(err) = spawn_operation(&self.shared, &mut state, child, name, Box::new(body)) {
            return Err(self.fail(&mut state, err));
        }
        debug!(parent = %self.id, %child, name, "spawned");
        Ok(child)
    }

    /// Give other operations a chance to run
    pub fn yield_now(&self) -> ExecutionResult<()> {
        let mut state = self.enter()?;
        self.scheduling_point(&mut state, OperationType::Yield, OperationTarget::Task, self.id.as_usize())
    }

    /// Wait until every operation in `targets` has completed
    pub fn join(&self, targets: &[OperationId]) -> ExecutionResult<()> {
        self.wait_for_tasks(targets, true)
    }

    /// Wait until at least one operation in `targets` has completed
    pub fn join_any(&self, targets: &[OperationId]) -> ExecutionResult<()> {
        if targets.is_empty() {
            return Ok(());
        }
        self.wait_for_tasks(targets, false)
    }

    fn wait_for_tasks(&self, targets: &[OperationId], wait_all: bool) -> ExecutionResult<()> {
        let mut state = self.enter()?;
        for target in targets {
            if let Err(err) = state.driver()?.operation(*target) {
                return Err(self.fail(&mut state, err));
            }
        }

        self.announce(&mut state, |op| op.set_next_join(targets))?;

        let driver = state.driver()?;
        let is_completed = |id: &OperationId| {
            driver
                .operation(*id)
                .map(|op| op.status().is_completed())
                .unwrap_or(false)
        };
        let satisfied = if wait_all {
            targets.iter().all(is_completed)
        } else {
            targets.iter().any(is_completed)
        };
        if satisfied {
            return Ok(());
        }

        if let Ok(op) = driver.operation_mut(self.id) {
            op.on_wait_task(targets, wait_all);
        }
        trace!(op = %self.id, ?targets, wait_all, "blocked on tasks");
        self.reschedule(&mut state)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Messages
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Deliver `message` to the inbox of `target`
    pub fn send(&self, target: OperationId, message: Message) -> ExecutionResult<()> {
        let mut state = self.enter()?;
        if let Err(err) = state.driver()?.operation(target) {
            return Err(self.fail(&mut state, err));
        }
        self.scheduling_point(&mut state, OperationType::Send, OperationTarget::Inbox, target.as_usize())?;

        let event = message.event_type();
        let send_step = state.driver()?.operation_steps().saturating_sub(1);
        if let Some(inbox) = state.inboxes.get_mut(target.as_usize()) {
            inbox.push_back(Envelope {
                message,
                sender: self.id,
                send_step,
            });
        }

        if let Ok(receiver) = state.driver()?.operation_mut(target) {
            if receiver.awaits_event(event) {
                receiver.on_received_event(send_step);
            }
        }
        debug!(from = %self.id, to = %target, %event, send_step, "sent");
        Ok(())
    }

    /// Take the first message of an awaited type, blocking until one arrives
    ///
    /// An empty `events` slice accepts any message.
    pub fn receive(&self, events: &[EventType]) -> ExecutionResult<Message> {
        let mut state = self.enter()?;
        self.scheduling_point(&mut state, OperationType::Receive, OperationTarget::Inbox, self.id.as_usize())?;

        loop {
            if let Some(envelope) = state.take_message(self.id, events) {
                if let Ok(op) = state.driver()?.operation_mut(self.id) {
                    op.on_received_event(envelope.send_step);
                }
                return Ok(envelope.message);
            }
            if let Ok(op) = state.driver()?.operation_mut(self.id) {
                op.on_wait_event(events);
            }
            trace!(op = %self.id, "blocked on receive");
            self.reschedule(&mut state)?;
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Resources
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create a shared resource with a single holder (a lock)
    pub fn create_resource(&self) -> ExecutionResult<ResourceId> {
        let mut state = self.enter()?;
        state.resources.push(None);
        Ok(ResourceId::new(state.resources.len() - 1))
    }

    /// Acquire `resource`, blocking while someone else holds it
    pub fn acquire(&self, resource: ResourceId) -> ExecutionResult<()> {
        let mut state = self.enter()?;
        self.check_resource(&mut state, resource)?;
        self.scheduling_point(&mut state, OperationType::Acquire, OperationTarget::Resource, resource.as_usize())?;

        loop {
            let holder = state.resources[resource.as_usize()];
            match holder {
                None => {
                    state.resources[resource.as_usize()] = Some(self.id);
                    return Ok(());
                }
                Some(holder) if holder == self.id => {
                    let message = format!("{} acquired {} twice", self.id, resource);
                    return Err(self.bug(&mut state, BugKind::Assertion, message));
                }
                Some(_) => {
                    if let Ok(op) = state.driver()?.operation_mut(self.id) {
                        op.on_wait_resource(resource);
                    }
                    self.reschedule(&mut state)?;
                }
            }
        }
    }

    /// Release `resource`, waking everyone waiting for it
    pub fn release(&self, resource: ResourceId) -> ExecutionResult<()> {
        let mut state = self.enter()?;
        self.check_resource(&mut state, resource)?;
        self.scheduling_point(&mut state, OperationType::Release, OperationTarget::Resource, resource.as_usize())?;

        if state.resources[resource.as_usize()] != Some(self.id) {
            let message = format!("{} released {} without holding it", self.id, resource);
            return Err(self.bug(&mut state, BugKind::Assertion, message));
        }
        state.resources[resource.as_usize()] = None;

        let driver = state.driver()?;
        let waiters: Vec<OperationId> = driver
            .operations()
            .iter()
            .filter(|op| op.awaited_resource() == Some(resource))
            .map(|op| op.id())
            .collect();
        for waiter in waiters {
            if let Ok(op) = driver.operation_mut(waiter) {
                op.on_resource_released(resource);
            }
        }
        Ok(())
    }

    fn check_resource(&self, state: &mut RuntimeState, resource: ResourceId) -> ExecutionResult<()> {
        if resource.as_usize() < state.resources.len() {
            Ok(())
        } else {
            let err = InterleaveError::Runtime(format!("unknown {}", resource));
            Err(self.fail(state, err))
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Nondeterminism, Assertions, Monitors
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Controlled coin flip
    pub fn random_bool(&self) -> ExecutionResult<bool> {
        let mut state = self.enter()?;
        let choice = state.driver()?.next_boolean();
        self.resolve_choice(&mut state, choice)
    }

    /// Controlled integer in `[0, max_value)`
    pub fn random_integer(&self, max_value: usize) -> ExecutionResult<usize> {
        let mut state = self.enter()?;
        let choice = state.driver()?.next_integer(max_value);
        self.resolve_choice(&mut state, choice)
    }

    fn resolve_choice<T>(
        &self,
        state: &mut RuntimeState,
        choice: Result<Option<T>, InterleaveError>,
    ) -> ExecutionResult<T> {
        match choice {
            Ok(Some(value)) => Ok(value),
            Ok(None) => {
                self.shared.turn.notify_all();
                Err(ExecutionCanceled::stopped())
            }
            Err(err) => Err(self.fail(state, err)),
        }
    }

    /// Report a safety bug unless `condition` holds
    pub fn assert(&self, condition: bool, message: impl fmt::Display) -> ExecutionResult<()> {
        if condition {
            return Ok(());
        }
        let mut state = self.enter()?;
        Err(self.bug(&mut state, BugKind::Assertion, message.to_string()))
    }

    /// Mark a liveness monitor as hot (progress pending)
    pub fn monitor_hot(&self, monitor: MonitorId) -> ExecutionResult<()> {
        self.set_monitor(monitor, true)
    }

    /// Mark a liveness monitor as cold (progress made)
    pub fn monitor_cold(&self, monitor: MonitorId) -> ExecutionResult<()> {
        self.set_monitor(monitor, false)
    }

    fn set_monitor(&self, monitor: MonitorId, hot: bool) -> ExecutionResult<()> {
        let mut state = self.enter()?;
        let known = {
            let mut registry = self.shared.monitors.lock();
            if hot {
                registry.set_hot(monitor)
            } else {
                registry.set_cold(monitor)
            }
        };
        if known {
            Ok(())
        } else {
            let err = InterleaveError::Runtime(format!("unknown {}", monitor));
            Err(self.fail(&mut state, err))
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Protocol
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Thread entry point of an operation
    fn run_operation(self, body: TaskBody) {
        let thread = thread::current().id();
        self.shared.threads.insert(thread, self.id);

        let mut state = self.shared.state.lock();
        let turn = self.wait_for_turn(&mut state);
        drop(state);
        let result = turn.map(|()| panic::catch_unwind(AssertUnwindSafe(|| body(&self))));

        let mut state = self.shared.state.lock();
        match result {
            Ok(Ok(Ok(()))) => self.complete(&mut state),
            Ok(Ok(Err(canceled))) | Err(canceled) => {
                trace!(op = %self.id, %canceled, "operation unwound");
            }
            Ok(Err(payload)) => {
                let message = format!("{} panicked: {}", self.id, panic_message(payload.as_ref()));
                if let Ok(driver) = state.driver() {
                    driver.notify_bug(BugKind::Panic, message);
                }
            }
        }

        state.live_threads -= 1;
        self.shared.threads.remove(&thread);
        self.shared.turn.notify_all();
    }

    fn complete(&self, state: &mut RuntimeState) {
        let Ok(driver) = state.driver() else {
            return;
        };
        if !driver.is_running() {
            return;
        }
        if let Ok(op) = driver.operation_mut(self.id) {
            op.on_completed();
        }
        debug!(op = %self.id, "completed");
        if let Err(err) = driver.schedule_next() {
            driver.abort(err);
        }
    }

    /// Lock the state for a primitive called by the current operation
    fn enter(&self) -> ExecutionResult<MutexGuard<'_, RuntimeState>> {
        let mut state = self.shared.state.lock();
        let controlled = self
            .shared
            .threads
            .get(&thread::current().id())
            .is_some_and(|entry| *entry == self.id);

        let driver = state.driver()?;
        if !driver.is_running() {
            return Err(ExecutionCanceled::stopped());
        }
        if !controlled {
            let message = format!(
                "uncontrolled thread '{}' invoked a controlled primitive of {}",
                thread::current().name().unwrap_or("<unnamed>"),
                self.id
            );
            driver.notify_bug(BugKind::Assertion, message);
            self.shared.turn.notify_all();
            return Err(ExecutionCanceled::new(CancelReason::UncontrolledThread));
        }
        if driver.current() != self.id {
            return Err(ExecutionCanceled::new(CancelReason::NotEnabled));
        }
        Ok(state)
    }

    /// Announce the next step, hand control to the driver and wait
    fn scheduling_point(
        &self,
        state: &mut MutexGuard<'_, RuntimeState>,
        op_type: OperationType,
        target: OperationTarget,
        target_id: usize,
    ) -> ExecutionResult<()> {
        self.announce(state, |op| op.set_next_operation(op_type, target, target_id))
    }

    fn announce<F>(&self, state: &mut MutexGuard<'_, RuntimeState>, describe: F) -> ExecutionResult<()>
    where
        F: FnOnce(&mut Operation),
    {
        let hashed = self.shared.capture_state(state);
        let announced = state.driver()?.operation_mut(self.id).map(describe);
        if let Err(err) = announced {
            return Err(self.fail(state, err));
        }
        state.driver()?.record_state(hashed);
        self.reschedule(state)
    }

    fn reschedule(&self, state: &mut MutexGuard<'_, RuntimeState>) -> ExecutionResult<()> {
        let driver = state.driver()?;
        if let Err(err) = driver.schedule_next() {
            driver.abort(err);
        }
        self.shared.turn.notify_all();
        self.wait_for_turn(state)
    }

    fn wait_for_turn(&self, state: &mut MutexGuard<'_, RuntimeState>) -> ExecutionResult<()> {
        loop {
            let driver = state.driver()?;
            if !driver.is_running() {
                return Err(ExecutionCanceled::stopped());
            }
            let runnable = driver.current() == self.id
                && driver.operation(self.id).is_ok_and(|op| op.is_enabled());
            if runnable {
                return Ok(());
            }
            self.shared.turn.wait(state);
        }
    }

    /// Record a bug and wake everyone so they unwind
    fn bug(&self, state: &mut RuntimeState, kind: BugKind, message: String) -> ExecutionCanceled {
        if let Ok(driver) = state.driver() {
            driver.notify_bug(kind, message);
        }
        self.shared.turn.notify_all();
        ExecutionCanceled::stopped()
    }

    /// Abort the iteration with a fatal error
    fn fail(&self, state: &mut RuntimeState, err: InterleaveError) -> ExecutionCanceled {
        if let Ok(driver) = state.driver() {
            driver.abort(err);
        }
        self.shared.turn.notify_all();
        ExecutionCanceled::stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::monitor::MonitorRegistry;
    use crate::domain::scheduler::IterationOutcome;
    use crate::domain::state::AbstractionLevel;
    use crate::domain::strategy::{DfsStrategy, RandomStrategy, Strategy};

    fn run<F>(strategy: Strategy, main: F) -> SchedulerOutput
    where
        F: FnOnce(&OperationContext) -> ExecutionResult<()> + Send + 'static,
    {
        let monitors = MonitorRegistry::new(100).into_shared();
        ControlledRuntime::new(OperationScheduler::new(strategy), monitors)
            .run(main)
            .expect("driver available")
    }

    #[test]
    fn test_single_operation_completes() {
        let output = run(Strategy::Dfs(DfsStrategy::new(0)), |ctx| {
            ctx.yield_now()?;
            ctx.yield_now()
        });
        assert_eq!(output.outcome, IterationOutcome::Completed);
        assert!(output.error.is_none());
        assert_eq!(output.trace.len(), 2);
    }

    #[test]
    fn test_spawn_and_join() {
        let output = run(Strategy::Random(RandomStrategy::new(5, 0)), |ctx| {
            let a = ctx.spawn("a", |ctx| ctx.yield_now())?;
            let b = ctx.spawn("b", |ctx| ctx.yield_now())?;
            ctx.join(&[a, b])
        });
        assert_eq!(output.outcome, IterationOutcome::Completed);
    }

    #[test]
    fn test_message_round_trip() {
        let output = run(Strategy::Random(RandomStrategy::new(9, 0)), |ctx| {
            let main = ctx.id();
            let worker = ctx.spawn("echo", move |ctx| {
                let message = ctx.receive(&[])?;
                ctx.send(main, Message::new(EventType::new(2), message.payload))
            })?;
            ctx.send(worker, Message::new(EventType::new(1), 41))?;
            let reply = ctx.receive(&[EventType::new(2)])?;
            ctx.assert(reply.payload == serde_json::json!(41), "echo changed the payload")
        });
        assert_eq!(output.outcome, IterationOutcome::Completed);
    }

    #[test]
    fn test_receive_without_sender_deadlocks() {
        let output = run(Strategy::Dfs(DfsStrategy::new(0)), |ctx| {
            ctx.receive(&[EventType::new(1)])?;
            Ok(())
        });
        assert_eq!(output.outcome, IterationOutcome::BugFound(BugKind::Deadlock));
        assert!(output.message.unwrap_or_default().contains("'main'"));
    }

    #[test]
    fn test_failed_assertion_is_reported() {
        let output = run(Strategy::Dfs(DfsStrategy::new(0)), |ctx| {
            ctx.yield_now()?;
            ctx.assert(1 + 1 == 3, "arithmetic is broken")
        });
        assert_eq!(output.outcome, IterationOutcome::BugFound(BugKind::Assertion));
        assert_eq!(output.message.as_deref(), Some("arithmetic is broken"));
    }

    #[test]
    fn test_panic_is_reported() {
        let output = run(Strategy::Dfs(DfsStrategy::new(0)), |ctx| {
            ctx.yield_now()?;
            panic!("boom");
        });
        assert_eq!(output.outcome, IterationOutcome::BugFound(BugKind::Panic));
        assert!(output.message.unwrap_or_default().contains("boom"));
    }

    #[test]
    fn test_uncontrolled_thread_is_reported() {
        let output = run(Strategy::Dfs(DfsStrategy::new(0)), |ctx| {
            let escaped = ctx.clone();
            thread::spawn(move || escaped.yield_now())
                .join()
                .unwrap_or(Err(ExecutionCanceled::stopped()))
        });
        assert_eq!(output.outcome, IterationOutcome::BugFound(BugKind::Assertion));
        assert!(output.message.unwrap_or_default().contains("uncontrolled thread"));
    }

    #[test]
    fn test_lock_order_inversion_can_deadlock() {
        let mut deadlocked = false;
        for seed in 0..50 {
            let output = run(Strategy::Random(RandomStrategy::new(seed, 0)), |ctx| {
                let first = ctx.create_resource()?;
                let second = ctx.create_resource()?;
                let worker = ctx.spawn("worker", move |ctx| {
                    ctx.acquire(second)?;
                    ctx.acquire(first)?;
                    ctx.release(first)?;
                    ctx.release(second)
                })?;
                ctx.acquire(first)?;
                ctx.acquire(second)?;
                ctx.release(second)?;
                ctx.release(first)?;
                ctx.join(&[worker])
            });
            if output.outcome == IterationOutcome::BugFound(BugKind::Deadlock) {
                deadlocked = true;
                break;
            }
            assert_eq!(output.outcome, IterationOutcome::Completed);
        }
        assert!(deadlocked);
    }

    #[test]
    fn test_release_without_holding() {
        let output = run(Strategy::Dfs(DfsStrategy::new(0)), |ctx| {
            let lock = ctx.create_resource()?;
            ctx.release(lock)
        });
        assert_eq!(output.outcome, IterationOutcome::BugFound(BugKind::Assertion));
    }

    #[test]
    fn test_state_fingerprint_changes_with_inbox() {
        let output = run(Strategy::Dfs(DfsStrategy::new(0)), |ctx| {
            let me = ctx.id();
            ctx.yield_now()?;
            ctx.send(me, Message::signal(EventType::new(3)))?;
            ctx.yield_now()?;
            ctx.receive(&[])?;
            Ok(())
        });
        assert_eq!(output.outcome, IterationOutcome::Completed);
        assert!(output.coverage.len(AbstractionLevel::InboxOnly) >= 2);
    }
}
