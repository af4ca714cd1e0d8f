//! State Abstraction & Hashing
//!
//! # Overview
//!
//! Strategies that learn from visited states need a cheap way to recognize
//! "I have been here before". The actor layer summarizes its state as an
//! integer fingerprint at four abstraction granularities:
//!
//! | Level       | Content                                        |
//! |-------------|------------------------------------------------|
//! | `Default`   | coarse summary chosen by the actor layer       |
//! | `InboxOnly` | only pending messages                          |
//! | `Custom`    | user supplied hash                             |
//! | `Full`      | everything observable                          |
//!
//! The core never computes these values for the program. It stores them on
//! the current [`Operation`](crate::domain::operation::Operation) at every
//! scheduling point and strategies compare them.
//!
//! # Bookkeeping
//!
//! - [`StateCoverage`]: distinct states seen per level (diagnostics)
//! - [`TransitionFrequencies`]: how often a state was visited (guidance)

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::InterleaveError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Abstraction Levels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Granularity at which program state is fingerprinted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbstractionLevel {
    /// Coarse summary
    #[default]
    Default,
    /// Pending messages only
    InboxOnly,
    /// User supplied
    Custom,
    /// Everything observable
    Full,
}

impl AbstractionLevel {
    /// All levels in declaration order
    pub const ALL: [AbstractionLevel; 4] = [
        AbstractionLevel::Default,
        AbstractionLevel::InboxOnly,
        AbstractionLevel::Custom,
        AbstractionLevel::Full,
    ];

    /// Get the configuration name of the level
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            AbstractionLevel::Default => "default",
            AbstractionLevel::InboxOnly => "inbox-only",
            AbstractionLevel::Custom => "custom",
            AbstractionLevel::Full => "full",
        }
    }
}

impl fmt::Display for AbstractionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AbstractionLevel {
    type Err = InterleaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(AbstractionLevel::Default),
            "inbox-only" | "inbox" => Ok(AbstractionLevel::InboxOnly),
            "custom" => Ok(AbstractionLevel::Custom),
            "full" => Ok(AbstractionLevel::Full),
            other => Err(InterleaveError::InvalidConfig(format!(
                "unknown abstraction level '{}'",
                other
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hashed State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Program state fingerprints captured at one scheduling point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HashedState {
    /// Fingerprint at [`AbstractionLevel::Default`]
    pub default: u64,
    /// Fingerprint at [`AbstractionLevel::InboxOnly`]
    pub inbox_only: u64,
    /// Fingerprint at [`AbstractionLevel::Custom`]
    pub custom: u64,
    /// Fingerprint at [`AbstractionLevel::Full`]
    pub full: u64,
}

impl HashedState {
    /// Capture all four levels from a hasher
    pub fn capture(hasher: &dyn StateHasher) -> Self {
        Self {
            default: hasher.hashed_state(AbstractionLevel::Default),
            inbox_only: hasher.hashed_state(AbstractionLevel::InboxOnly),
            custom: hasher.hashed_state(AbstractionLevel::Custom),
            full: hasher.hashed_state(AbstractionLevel::Full),
        }
    }

    /// Get the fingerprint for one level
    #[inline]
    pub const fn at(&self, level: AbstractionLevel) -> u64 {
        match level {
            AbstractionLevel::Default => self.default,
            AbstractionLevel::InboxOnly => self.inbox_only,
            AbstractionLevel::Custom => self.custom,
            AbstractionLevel::Full => self.full,
        }
    }
}

/// Hook through which the actor layer exposes its state fingerprints
///
/// Any `Fn(AbstractionLevel) -> u64` closure is a hasher.
///
/// # Example
///
/// ```rust
/// use krepis_interleave::domain::state::{AbstractionLevel, HashedState};
///
/// let hasher = |level: AbstractionLevel| match level {
///     AbstractionLevel::Custom => 42,
///     _ => 7,
/// };
///
/// let state = HashedState::capture(&hasher);
/// assert_eq!(state.custom, 42);
/// assert_eq!(state.at(AbstractionLevel::Full), 7);
/// ```
pub trait StateHasher: Send + Sync {
    /// Fingerprint of the current program state at `level`
    fn hashed_state(&self, level: AbstractionLevel) -> u64;
}

impl<F> StateHasher for F
where
    F: Fn(AbstractionLevel) -> u64 + Send + Sync,
{
    fn hashed_state(&self, level: AbstractionLevel) -> u64 {
        self(level)
    }
}

/// Deterministic fingerprint builder
///
/// Uses SipHash with fixed keys, so equal inputs give equal fingerprints in
/// every process built from the same toolchain.
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    hasher: DefaultHasher,
}

impl Fingerprint {
    /// Create an empty fingerprint
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix a value into the fingerprint
    pub fn write<T: Hash + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.hash(&mut self.hasher);
        self
    }

    /// Finish and return the fingerprint
    pub fn finish(&self) -> u64 {
        self.hasher.finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Distinct states observed at every abstraction level
#[derive(Debug, Clone, Default)]
pub struct StateCoverage {
    default: HashSet<u64>,
    inbox_only: HashSet<u64>,
    custom: HashSet<u64>,
    full: HashSet<u64>,
}

impl StateCoverage {
    /// Create empty coverage
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the fingerprints of one scheduling point
    pub fn record(&mut self, state: &HashedState) {
        self.default.insert(state.default);
        self.inbox_only.insert(state.inbox_only);
        self.custom.insert(state.custom);
        self.full.insert(state.full);
    }

    /// Number of distinct states seen at `level`
    pub fn len(&self, level: AbstractionLevel) -> usize {
        match level {
            AbstractionLevel::Default => self.default.len(),
            AbstractionLevel::InboxOnly => self.inbox_only.len(),
            AbstractionLevel::Custom => self.custom.len(),
            AbstractionLevel::Full => self.full.len(),
        }
    }

    /// Check if nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.default.is_empty()
    }

    /// Snapshot of the per-level counts
    pub fn counts(&self) -> CoverageCounts {
        CoverageCounts {
            default: self.default.len(),
            inbox_only: self.inbox_only.len(),
            custom: self.custom.len(),
            full: self.full.len(),
        }
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.default.clear();
        self.inbox_only.clear();
        self.custom.clear();
        self.full.clear();
    }
}

/// Per-level distinct state counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCounts {
    /// Distinct default states
    pub default: usize,
    /// Distinct inbox-only states
    pub inbox_only: usize,
    /// Distinct custom states
    pub custom: usize,
    /// Distinct full states
    pub full: usize,
}

/// Visit counts of program states along explored paths
#[derive(Debug, Clone, Default)]
pub struct TransitionFrequencies {
    visits: HashMap<u64, u64>,
}

impl TransitionFrequencies {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more visit of `state` and return the new count
    pub fn record(&mut self, state: u64) -> u64 {
        let count = self.visits.entry(state).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// How often `state` was visited
    pub fn frequency(&self, state: u64) -> u64 {
        self.visits.get(&state).copied().unwrap_or(0)
    }

    /// Number of distinct visited states
    pub fn unique_states(&self) -> usize {
        self.visits.len()
    }

    /// Forget all visits
    pub fn clear(&mut self) {
        self.visits.clear();
    }
}
