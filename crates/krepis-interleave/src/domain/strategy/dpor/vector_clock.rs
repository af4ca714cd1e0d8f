//! Causality Clocks for Race Analysis
//!
//! Each step of an explored path gets a clock recording, per operation, how
//! many of that operation's steps it causally depends on. Clocks form a
//! partial order: `a < b` means the step of `a` happens before the step of
//! `b`, and incomparable clocks belong to concurrent steps.
//!
//! Entries grow on demand; a missing entry reads as 0.

use std::cmp::Ordering;

use crate::domain::operation::OperationId;

/// Per-operation step counts, ordered by causality
#[derive(Debug, Clone, Default)]
pub struct VectorClock {
    entries: Vec<u64>,
}

impl VectorClock {
    /// Clock with every entry at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more step of `op`
    pub fn tick(&mut self, op: OperationId) {
        let slot = op.as_usize();
        if self.entries.len() <= slot {
            self.entries.resize(slot + 1, 0);
        }
        self.entries[slot] += 1;
    }

    /// Absorb everything `other` depends on
    pub fn merge(&mut self, other: &VectorClock) {
        if self.entries.len() < other.entries.len() {
            self.entries.resize(other.entries.len(), 0);
        }
        self.entries
            .iter_mut()
            .zip(&other.entries)
            .for_each(|(mine, theirs)| *mine = (*mine).max(*theirs));
    }

    /// Steps of `op` this clock depends on
    pub fn get(&self, op: OperationId) -> u64 {
        self.entries.get(op.as_usize()).copied().unwrap_or(0)
    }

    /// Check if the step of `self` happens before the step of `other`
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.partial_cmp(other) == Some(Ordering::Less)
    }

    /// Check if neither step happens before the other
    pub fn concurrent(&self, other: &VectorClock) -> bool {
        self.partial_cmp(other).is_none()
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl Eq for VectorClock {}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let len = self.entries.len().max(other.entries.len());
        let mut order = Ordering::Equal;
        for slot in 0..len {
            let mine = self.entries.get(slot).copied().unwrap_or(0);
            let theirs = other.entries.get(slot).copied().unwrap_or(0);
            match (order, mine.cmp(&theirs)) {
                (_, Ordering::Equal) => {}
                (Ordering::Equal, step) => order = step,
                (current, step) if current != step => return None,
                _ => {}
            }
        }
        Some(order)
    }
}

impl FromIterator<u64> for VectorClock {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
