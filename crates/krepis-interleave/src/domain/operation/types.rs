//! Operation Types - Identity, Kind, Target and Status
//!
//! # Design Philosophy
//!
//! These types describe a schedulable unit of work without knowing anything
//! about what the work is. The driver and the strategies only ever look at:
//!
//! - who the operation is (`OperationId`, source name)
//! - what it is about to do (`OperationType`, `OperationTarget`, target id)
//! - whether it can run (`OperationStatus`)
//!
//! # Status Transitions
//!
//! ```text
//!  None ──> Enabled ──> BlockedOnWaitAll  ──┐
//!              ↑   ├──> BlockedOnWaitAny  ──┤
//!              │   ├──> BlockedOnReceive  ──┤
//!              │   └──> BlockedOnResource ──┤
//!              └────────────────────────────┘  (re-enabled)
//!
//!  any ──> Completed   (terminal)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation identifier
///
/// Stable per logical task for the whole iteration. Operations are stored in
/// creation order, so the id doubles as the index into the operation table.
///
/// # Example
///
/// ```rust
/// use krepis_interleave::domain::operation::OperationId;
///
/// let main = OperationId::new(0);
/// let worker = OperationId::new(1);
///
/// assert!(main < worker);
/// assert_eq!(worker.as_usize(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub usize);

impl OperationId {
    /// Create a new OperationId
    #[inline(always)]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw numeric ID
    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Op({})", self.0)
    }
}

/// Shared resource identifier (locks, semaphores)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub usize);

impl ResourceId {
    /// Create a new ResourceId
    #[inline(always)]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw numeric ID
    #[inline(always)]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({})", self.0)
    }
}

/// Event type carried by a message
///
/// The actor layer decides what the numbers mean. The core only compares them
/// to decide whether a blocked receive can be unblocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(pub u64);

impl EventType {
    /// Create a new EventType
    #[inline(always)]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw numeric value
    #[inline(always)]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({})", self.0)
    }
}

/// What an operation is about to do at its next scheduling point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// First step of a newly created operation
    Start,
    /// Creation of another operation
    Create,
    /// Any step without a more specific kind (nondeterministic choices)
    Default,
    /// Sending a message to an inbox
    Send,
    /// Receiving a message from its own inbox
    Receive,
    /// Voluntarily giving up the processor
    Yield,
    /// Acquiring a shared resource
    Acquire,
    /// Releasing a shared resource
    Release,
    /// Waiting for other operations to complete
    Join,
    /// Completion of the operation
    Stop,
}

impl OperationType {
    /// Check if the step touches state shared with other operations
    ///
    /// Yield and Default steps only affect the operation itself.
    #[inline(always)]
    pub const fn is_visible(self) -> bool {
        !matches!(self, OperationType::Yield | OperationType::Default)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Start => "Start",
            OperationType::Create => "Create",
            OperationType::Default => "Default",
            OperationType::Send => "Send",
            OperationType::Receive => "Receive",
            OperationType::Yield => "Yield",
            OperationType::Acquire => "Acquire",
            OperationType::Release => "Release",
            OperationType::Join => "Join",
            OperationType::Stop => "Stop",
        };
        write!(f, "{}", name)
    }
}

/// What kind of object the next step acts upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationTarget {
    /// Another operation (create, join, start, stop, yield)
    Task,
    /// A message inbox (send, receive)
    Inbox,
    /// A shared resource (acquire, release)
    Resource,
}

impl fmt::Display for OperationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationTarget::Task => write!(f, "Task"),
            OperationTarget::Inbox => write!(f, "Inbox"),
            OperationTarget::Resource => write!(f, "Resource"),
        }
    }
}

/// Scheduling status of an operation
///
/// Only `Enabled` operations are ever offered to a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationStatus {
    /// Registered but not yet created
    #[default]
    None,
    /// Ready to be scheduled
    Enabled,
    /// Waiting for all of its dependencies to complete
    BlockedOnWaitAll,
    /// Waiting for any of its dependencies to complete
    BlockedOnWaitAny,
    /// Waiting for a message of an awaited event type
    BlockedOnReceive,
    /// Waiting for a shared resource held by someone else
    BlockedOnResource,
    /// Finished (terminal)
    Completed,
}

impl OperationStatus {
    /// Check if the operation can be scheduled
    #[inline(always)]
    pub const fn is_enabled(self) -> bool {
        matches!(self, OperationStatus::Enabled)
    }

    /// Check if the operation is waiting on something
    #[inline(always)]
    pub const fn is_blocked(self) -> bool {
        matches!(
            self,
            OperationStatus::BlockedOnWaitAll
                | OperationStatus::BlockedOnWaitAny
                | OperationStatus::BlockedOnReceive
                | OperationStatus::BlockedOnResource
        )
    }

    /// Check if the operation has finished
    #[inline(always)]
    pub const fn is_completed(self) -> bool {
        matches!(self, OperationStatus::Completed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationStatus::None => "NONE",
            OperationStatus::Enabled => "ENABLED",
            OperationStatus::BlockedOnWaitAll => "BLOCKED_ON_WAIT_ALL",
            OperationStatus::BlockedOnWaitAny => "BLOCKED_ON_WAIT_ANY",
            OperationStatus::BlockedOnReceive => "BLOCKED_ON_RECEIVE",
            OperationStatus::BlockedOnResource => "BLOCKED_ON_RESOURCE",
            OperationStatus::Completed => "COMPLETED",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(OperationStatus::Enabled.is_enabled());
        assert!(!OperationStatus::None.is_enabled());

        assert!(OperationStatus::BlockedOnWaitAll.is_blocked());
        assert!(OperationStatus::BlockedOnWaitAny.is_blocked());
        assert!(OperationStatus::BlockedOnReceive.is_blocked());
        assert!(OperationStatus::BlockedOnResource.is_blocked());
        assert!(!OperationStatus::Enabled.is_blocked());
        assert!(!OperationStatus::Completed.is_blocked());

        assert!(OperationStatus::Completed.is_completed());
        assert_eq!(OperationStatus::default(), OperationStatus::None);
    }

    #[test]
    fn test_visible_types() {
        assert!(OperationType::Send.is_visible());
        assert!(OperationType::Acquire.is_visible());
        assert!(!OperationType::Yield.is_visible());
        assert!(!OperationType::Default.is_visible());
    }

    #[test]
    fn test_display() {
        assert_eq!(OperationId::new(3).to_string(), "Op(3)");
        assert_eq!(ResourceId::new(1).to_string(), "Resource(1)");
        assert_eq!(OperationStatus::BlockedOnReceive.to_string(), "BLOCKED_ON_RECEIVE");
        assert_eq!(OperationType::Join.to_string(), "Join");
    }
}
