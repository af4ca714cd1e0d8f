//! Race Analysis
//!
//! After an iteration, replays the explored path through vector clocks and
//! reports every pair of conflicting steps that could have happened in the
//! other order.
//!
//! # Causality
//!
//! ```text
//!   program order:   step i of op p → next step of op p
//!   message:         send step      → receive step that consumed it
//!   creation:        create step    → start step of the child
//!   join:            last step of q → join step, for every completed q it waits on
//! ```
//!
//! Two steps race when they are dependent (same object, both visible, by
//! different operations) and neither happens-before the other. For each step
//! only the closest racing predecessor is reported; earlier ones are covered
//! transitively once that race is reversed.

use std::collections::HashMap;

use super::stack::{ChoiceFrame, PendingStep};
use super::vector_clock::VectorClock;
use crate::domain::operation::{OperationId, OperationType};

/// A race whose reversal means scheduling `op` at depth `frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Race {
    /// Depth of the earlier racing step
    pub frame: usize,
    /// Operation of the later racing step
    pub op: OperationId,
}

/// Vector clock of every step on the path
pub fn step_clocks(frames: &[ChoiceFrame]) -> Vec<VectorClock> {
    let mut op_clocks: HashMap<OperationId, VectorClock> = HashMap::new();
    let mut created_at: HashMap<usize, usize> = HashMap::new();
    let mut clocks: Vec<VectorClock> = Vec::with_capacity(frames.len());

    for (depth, frame) in frames.iter().enumerate() {
        let Some((op, step)) = frame.selected_step() else {
            clocks.push(VectorClock::new());
            continue;
        };

        let mut vc = op_clocks.get(&op).cloned().unwrap_or_default();
        match step.op_type {
            OperationType::Receive => {
                if let Some(send) = frame.matching_send.filter(|s| *s < depth) {
                    vc.merge(&clocks[send]);
                }
            }
            OperationType::Start => {
                if let Some(create) = created_at.get(&op.as_usize()) {
                    vc.merge(&clocks[*create]);
                }
            }
            OperationType::Join => {
                for target in joined_tasks(frame, step) {
                    if let Some(target) = op_clocks.get(&target) {
                        vc.merge(target);
                    }
                }
            }
            _ => {}
        }
        if step.op_type == OperationType::Create {
            created_at.insert(step.target_id, depth);
        }

        vc.tick(op);
        op_clocks.insert(op, vc.clone());
        clocks.push(vc);
    }
    clocks
}

/// Joined tasks that had already completed when the join step ran
///
/// A completed operation has no pending step in the frame.
fn joined_tasks<'a>(
    frame: &'a ChoiceFrame,
    step: &'a PendingStep,
) -> impl Iterator<Item = OperationId> + 'a {
    let single = OperationId::new(step.target_id);
    let targets: Vec<OperationId> = if step.join_targets.is_empty() {
        vec![single]
    } else {
        step.join_targets.iter().collect()
    };
    targets
        .into_iter()
        .filter(move |id| frame.pending.get(id.as_usize()).is_some_and(Option::is_none))
}

/// Find the races of the explored path
pub fn find_races(frames: &[ChoiceFrame]) -> Vec<Race> {
    let clocks = step_clocks(frames);
    let mut races = Vec::new();

    for j in 0..frames.len() {
        let Some((op_j, step_j)) = frames[j].selected_step() else {
            continue;
        };
        for i in (0..j).rev() {
            let Some((op_i, step_i)) = frames[i].selected_step() else {
                continue;
            };
            if op_i == op_j || !step_i.is_dependent(step_j) {
                continue;
            }
            if clocks[i].happens_before(&clocks[j]) {
                continue;
            }
            races.push(Race { frame: i, op: op_j });
            break;
        }
    }
    races
}
