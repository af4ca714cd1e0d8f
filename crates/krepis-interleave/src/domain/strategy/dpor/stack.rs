//! DPOR Choice Stack
//!
//! # Layout
//!
//! ```text
//! frame 0 ─┬─ enabled   {0, 1, 2}
//!          ├─ backtrack {0, 2}        still to be explored here
//!          ├─ done      {0}           already explored here
//!          ├─ sleep     {}            provably redundant here
//!          ├─ pending   [Send@Inbox(1), Acquire@Resource(0), ...]
//!          ├─ selected  Op(2)
//!          └─ choices   [bool 1/2, int 0/3]
//! frame 1 ─ ...
//! ```
//!
//! Frame `d` describes the state reached after `d` scheduling decisions.
//! `pending[op]` is the step each operation would take if scheduled there.

use std::fmt;

use crate::domain::operation::{Operation, OperationId, OperationTarget, OperationType};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operation Set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Growable bitset of operation ids
///
/// # Operations
///
/// ```text
/// insert(3):     words[0] |= (1 << 3)
/// contains(3):   words[0] & (1 << 3)
/// difference:    A & !B
/// first:         trailing_zeros() of the first non-zero word
/// ```
#[derive(Clone, PartialEq, Eq, Default)]
pub struct OpSet {
    words: Vec<u64>,
}

impl OpSet {
    /// Create a new empty set
    #[inline]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Insert an operation
    #[inline]
    pub fn insert(&mut self, id: OperationId) {
        let (word, bit) = Self::locate(id);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << bit;
    }

    /// Remove an operation
    #[inline]
    pub fn remove(&mut self, id: OperationId) {
        let (word, bit) = Self::locate(id);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1u64 << bit);
        }
    }

    /// Check membership
    #[inline]
    pub fn contains(&self, id: OperationId) -> bool {
        let (word, bit) = Self::locate(id);
        self.words
            .get(word)
            .map(|w| w & (1u64 << bit) != 0)
            .unwrap_or(false)
    }

    /// In-place union (A ∪ B)
    pub fn union_with(&mut self, other: &Self) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (mine, theirs) in self.words.iter_mut().zip(other.words.iter()) {
            *mine |= theirs;
        }
    }

    /// Check if the sets share a member (A ∩ B ≠ ∅)
    pub fn intersects(&self, other: &Self) -> bool {
        self.words.iter().zip(other.words.iter()).any(|(mine, theirs)| mine & theirs != 0)
    }

    /// In-place difference (A \ B = A & !B)
    pub fn difference_with(&mut self, other: &Self) {
        for (mine, theirs) in self.words.iter_mut().zip(other.words.iter()) {
            *mine &= !theirs;
        }
    }

    /// Lowest member
    pub fn first(&self) -> Option<OperationId> {
        self.words.iter().enumerate().find_map(|(idx, w)| {
            (*w != 0).then(|| OperationId::new(idx * 64 + w.trailing_zeros() as usize))
        })
    }

    /// Members in ascending order
    pub fn iter(&self) -> impl Iterator<Item = OperationId> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, word)| {
            let mut bits = *word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(OperationId::new(idx * 64 + bit))
            })
        })
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Check if the set is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Clear all members
    #[inline]
    pub fn clear(&mut self) {
        self.words.clear();
    }

    #[inline(always)]
    const fn locate(id: OperationId) -> (usize, usize) {
        (id.as_usize() / 64, id.as_usize() % 64)
    }
}

impl FromIterator<OperationId> for OpSet {
    fn from_iter<I: IntoIterator<Item = OperationId>>(iter: I) -> Self {
        let mut set = OpSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Debug for OpSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|id| id.as_usize())).finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending Steps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
/// The step an operation would take if scheduled at a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStep {
    /// Step kind
    pub op_type: OperationType,
    /// Kind of object touched
    pub target: OperationTarget,
    /// Id of object touched
    pub target_id: usize,
    /// Every operation a join step waits on
    pub join_targets: OpSet,
}

impl PendingStep {
    /// Step touching a single object
    pub fn new(op_type: OperationType, target: OperationTarget, target_id: usize) -> Self {
        Self {
            op_type,
            target,
            target_id,
            join_targets: OpSet::new(),
        }
    }

    /// Snapshot the next step of `op`
    pub fn of(op: &Operation) -> Self {
        Self {
            op_type: op.op_type(),
            target: op.target(),
            target_id: op.target_id(),
            join_targets: op.join_targets().iter().copied().collect(),
        }
    }

    /// Check if executing both steps in either order can differ
    ///
    /// Both must be visible and touch the same object. A join touches every
    /// task it waits on.
    pub fn is_dependent(&self, other: &PendingStep) -> bool {
        if !self.op_type.is_visible() || !other.op_type.is_visible() || self.target != other.target {
            return false;
        }
        if self.target == OperationTarget::Task {
            return self.tasks().intersects(&other.tasks());
        }
        self.target_id == other.target_id
    }

    /// Tasks a task-targeted step touches
    fn tasks(&self) -> OpSet {
        if self.op_type == OperationType::Join && !self.join_targets.is_empty() {
            return self.join_targets.clone();
        }
        std::iter::once(OperationId::new(self.target_id)).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Nondeterministic Choices
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One controlled value choice: `index` out of `options`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueChoice {
    /// Number of alternatives
    pub options: usize,
    /// Alternative taken
    pub index: usize,
}

/// Value choices taken between two scheduling decisions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChoiceList {
    choices: Vec<ValueChoice>,
    cursor: usize,
}

impl ChoiceList {
    /// Replay the recorded choice at the cursor, or record `fresh`
    ///
    /// `fresh` produces the index of a new choice given its option count.
    pub fn next<F>(&mut self, options: usize, fresh: F) -> usize
    where
        F: FnOnce(usize) -> usize,
    {
        let options = options.max(1);
        let index = match self.choices.get(self.cursor) {
            Some(choice) if choice.options == options => choice.index,
            _ => {
                self.choices.truncate(self.cursor);
                let index = fresh(options).min(options - 1);
                self.choices.push(ValueChoice { options, index });
                index
            }
        };
        self.cursor += 1;
        index
    }

    /// Move to the next untried combination, deepest choice first
    ///
    /// Returns `false` when every combination has been tried.
    pub fn advance(&mut self) -> bool {
        self.cursor = 0;
        while let Some(last) = self.choices.last_mut() {
            if last.index + 1 < last.options {
                last.index += 1;
                return true;
            }
            self.choices.pop();
        }
        false
    }

    /// Restart replay from the first choice
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Drop every recorded choice
    pub fn clear(&mut self) {
        self.choices.clear();
        self.cursor = 0;
    }

    /// Number of recorded choices
    pub fn len(&self) -> usize {
        self.choices.len()
    }

    /// Check if no choice was recorded
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Choice Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything DPOR knows about one scheduling depth
#[derive(Debug, Clone, Default)]
pub struct ChoiceFrame {
    /// Operations enabled at this depth
    pub enabled: OpSet,
    /// Operations that must still be explored here
    pub backtrack: OpSet,
    /// Operations already explored here
    pub done: OpSet,
    /// Operations whose exploration here is provably redundant
    pub sleep: OpSet,
    /// Next step of every operation, indexed by id
    pub pending: Vec<Option<PendingStep>>,
    /// Operation scheduled on the current path
    pub selected: Option<OperationId>,
    /// Send step consumed by the selected step, if it was a receive
    pub matching_send: Option<usize>,
    /// Value choices made after the selected step
    pub choices: ChoiceList,
}

impl ChoiceFrame {
    /// Snapshot the operation table
    pub fn capture(ops: &[Operation]) -> Self {
        let mut frame = ChoiceFrame::default();
        frame.pending = vec![None; ops.len()];
        for op in ops {
            if op.is_enabled() {
                frame.enabled.insert(op.id());
            }
            if !op.status().is_completed() {
                if let Some(slot) = frame.pending.get_mut(op.id().as_usize()) {
                    *slot = Some(PendingStep::of(op));
                }
            }
        }
        frame
    }

    /// Pending step of `id` at this depth
    pub fn pending_of(&self, id: OperationId) -> Option<&PendingStep> {
        self.pending.get(id.as_usize())?.as_ref()
    }

    /// Step taken on the current path
    pub fn selected_step(&self) -> Option<(OperationId, &PendingStep)> {
        let id = self.selected?;
        Some((id, self.pending_of(id)?))
    }

    /// Backtrack candidates not yet done and not asleep
    pub fn unexplored(&self) -> OpSet {
        let mut candidates = self.backtrack.clone();
        candidates.difference_with(&self.done);
        candidates.difference_with(&self.sleep);
        candidates
    }

    /// Enabled operations that are not asleep
    pub fn awake(&self) -> OpSet {
        let mut awake = self.enabled.clone();
        awake.difference_with(&self.sleep);
        awake
    }

    /// Sleep set inherited by the frame that follows this one
    ///
    /// Everything asleep or done here stays asleep below, unless its pending
    /// step conflicts with the step taken here.
    pub fn inherited_sleep(&self) -> OpSet {
        let Some((selected, step)) = self.selected_step() else {
            return OpSet::new();
        };
        let mut sleep = self.sleep.clone();
        sleep.union_with(&self.done);
        sleep.remove(selected);
        sleep
            .iter()
            .filter(|id| match self.pending_of(*id) {
                Some(other) => !other.is_dependent(step),
                None => false,
            })
            .collect()
    }
}
