//! DPOR: Dynamic Partial-Order Reduction
//!
//! # Overview
//!
//! Two executions that differ only in the order of *independent* steps end
//! in the same state. DPOR explores one representative per equivalence class
//! by only reordering steps that actually race.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ DporStrategy    │  stack-based DFS over choice frames
//! ├─────────────────┤
//! │ - frames        │  enabled / backtrack / done / sleep per depth
//! │ - race analysis │  vector clocks over the explored path
//! │ - random mode   │  race-reversal sampling (rDPOR)
//! └─────────────────┘
//! ```
//!
//! # Sleep sets
//!
//! After exploring `t` at some depth, a sibling branch need not schedule `t`
//! again until a step dependent with `t` has run. Such operations are
//! *asleep* and skipped when choosing.

pub mod race;
pub mod stack;
pub mod strategy;
pub mod vector_clock;

pub use race::{find_races, Race};
pub use stack::{ChoiceFrame, ChoiceList, OpSet, PendingStep};
pub use strategy::{DporStats, DporStrategy, DEFAULT_RACE_REVERSAL_LIMIT};
pub use vector_clock::VectorClock;
