//! Operation State Machine
//!
//! An [`Operation`] is pure data: the runtime mutates it when the unit of
//! work it stands for blocks, receives, or completes, and the driver reads it
//! when gathering candidates. Nothing here knows about strategies.

use super::types::{
    EventType, OperationId, OperationStatus, OperationTarget, OperationType, ResourceId,
};
use crate::domain::state::HashedState;

/// One schedulable unit of work
///
/// # Lifecycle
///
/// ```text
/// register ──> on_created ──> (scheduling points) ──> on_completed
///                  │                  │
///                  │      on_wait_task / on_wait_event / on_wait_resource
///                  │                  │
///                  │      try_enable / on_received_event / on_resource_released
///                  └──────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct Operation {
    id: OperationId,
    name: String,
    op_type: OperationType,
    status: OperationStatus,
    target: OperationTarget,
    target_id: usize,
    matching_send_index: Option<usize>,
    dependencies: Vec<OperationId>,
    join_targets: Vec<OperationId>,
    awaited_events: Vec<EventType>,
    awaited_resource: Option<ResourceId>,
    hashed_state: HashedState,
}

impl Operation {
    /// Register a new operation in status `None`
    pub fn new(id: OperationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            op_type: OperationType::Start,
            status: OperationStatus::None,
            target: OperationTarget::Task,
            target_id: id.as_usize(),
            matching_send_index: None,
            dependencies: Vec::new(),
            join_targets: Vec::new(),
            awaited_events: Vec::new(),
            awaited_resource: None,
            hashed_state: HashedState::default(),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Accessors
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Stable identifier
    #[inline]
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Source name given at registration
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the next step
    #[inline]
    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    /// Current scheduling status
    #[inline]
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// Kind of object the next step acts upon
    #[inline]
    pub fn target(&self) -> OperationTarget {
        self.target
    }

    /// Id of the object the next step acts upon
    #[inline]
    pub fn target_id(&self) -> usize {
        self.target_id
    }

    /// Step index of the send whose message the last receive consumed
    #[inline]
    pub fn matching_send_index(&self) -> Option<usize> {
        self.matching_send_index
    }

    /// Operations this one is waiting for
    #[inline]
    pub fn dependencies(&self) -> &[OperationId] {
        &self.dependencies
    }

    /// Operations the next step joins, empty unless it is a join
    #[inline]
    pub fn join_targets(&self) -> &[OperationId] {
        &self.join_targets
    }

    /// Event types a blocked receive is waiting for
    #[inline]
    pub fn awaited_events(&self) -> &[EventType] {
        &self.awaited_events
    }

    /// Resource a blocked acquire is waiting for
    #[inline]
    pub fn awaited_resource(&self) -> Option<ResourceId> {
        self.awaited_resource
    }

    /// Program state fingerprints captured at the last scheduling point
    #[inline]
    pub fn hashed_state(&self) -> &HashedState {
        &self.hashed_state
    }

    /// Check if the operation can be offered to a strategy
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Transitions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //
    // Transitions from the wrong source status are ignored. Completed is
    // terminal and only on_created may leave None.

    /// Any status → Enabled
    pub fn on_created(&mut self) {
        self.status = OperationStatus::Enabled;
        self.matching_send_index = None;
        self.dependencies.clear();
        self.awaited_events.clear();
        self.awaited_resource = None;
    }

    /// Enabled → BlockedOnWaitAll / BlockedOnWaitAny
    pub fn on_wait_task(&mut self, dependencies: &[OperationId], wait_all: bool) {
        if !self.status.is_enabled() {
            return;
        }
        self.dependencies = dependencies.to_vec();
        self.status = if wait_all {
            OperationStatus::BlockedOnWaitAll
        } else {
            OperationStatus::BlockedOnWaitAny
        };
    }

    /// Re-enable a task wait whose dependencies are satisfied
    ///
    /// Returns `true` when the status changed to Enabled.
    pub fn try_enable<F>(&mut self, is_completed: F) -> bool
    where
        F: Fn(OperationId) -> bool,
    {
        let ready = match self.status {
            OperationStatus::BlockedOnWaitAll => {
                self.dependencies.iter().all(|dep| is_completed(*dep))
            }
            OperationStatus::BlockedOnWaitAny => {
                self.dependencies.iter().any(|dep| is_completed(*dep))
            }
            _ => false,
        };

        if ready {
            self.dependencies.clear();
            self.status = OperationStatus::Enabled;
        }
        ready
    }

    /// Enabled → BlockedOnReceive
    pub fn on_wait_event(&mut self, event_types: &[EventType]) {
        if !self.status.is_enabled() {
            return;
        }
        self.awaited_events = event_types.to_vec();
        self.status = OperationStatus::BlockedOnReceive;
    }

    /// Check if a blocked receive would accept `event`
    ///
    /// An empty awaited set accepts any event.
    pub fn awaits_event(&self, event: EventType) -> bool {
        self.status == OperationStatus::BlockedOnReceive
            && (self.awaited_events.is_empty() || self.awaited_events.contains(&event))
    }

    /// Record the send a receive consumed, re-enabling a blocked receive
    ///
    /// Also used for receives that found a message without blocking.
    pub fn on_received_event(&mut self, send_step: usize) {
        if self.status == OperationStatus::BlockedOnReceive {
            self.status = OperationStatus::Enabled;
        }
        self.awaited_events.clear();
        self.matching_send_index = Some(send_step);
    }

    /// Enabled → BlockedOnResource
    pub fn on_wait_resource(&mut self, resource: ResourceId) {
        if !self.status.is_enabled() {
            return;
        }
        self.awaited_resource = Some(resource);
        self.status = OperationStatus::BlockedOnResource;
    }

    /// BlockedOnResource on `resource` → Enabled
    ///
    /// Returns `true` when the status changed.
    pub fn on_resource_released(&mut self, resource: ResourceId) -> bool {
        if self.status == OperationStatus::BlockedOnResource
            && self.awaited_resource == Some(resource)
        {
            self.awaited_resource = None;
            self.status = OperationStatus::Enabled;
            true
        } else {
            false
        }
    }

    /// Any status → Completed (terminal)
    pub fn on_completed(&mut self) {
        self.status = OperationStatus::Completed;
        self.op_type = OperationType::Stop;
        self.matching_send_index = None;
        self.dependencies.clear();
        self.join_targets.clear();
        self.awaited_events.clear();
        self.awaited_resource = None;
    }

    /// Describe the step the operation is about to take
    pub fn set_next_operation(
        &mut self,
        op_type: OperationType,
        target: OperationTarget,
        target_id: usize,
    ) {
        self.op_type = op_type;
        self.target = target;
        self.target_id = target_id;
        self.join_targets.clear();
    }

    /// Describe a join on `targets` as the next step
    pub fn set_next_join(&mut self, targets: &[OperationId]) {
        let first = targets.first().copied().unwrap_or(self.id);
        self.set_next_operation(OperationType::Join, OperationTarget::Task, first.as_usize());
        self.join_targets = targets.to_vec();
    }

    /// Store the state fingerprints of the current scheduling point
    pub fn set_hashed_state(&mut self, state: HashedState) {
        self.hashed_state = state;
    }
}
