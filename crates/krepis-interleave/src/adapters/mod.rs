//! Adapters Layer - The Testing Surface
//!
//! Connects user-facing configuration to the domain's scheduling core and
//! the controlled runtime.
//!
//! - [`config`]: `TestConfig` and the `name:param` strategy selection
//! - [`engine`]: `TestingEngine`, the iteration loop
//! - [`report`]: `TestReport` and per-iteration summaries

pub mod config;
pub mod engine;
pub mod report;

pub use config::{StrategyConfig, TestConfig};
pub use engine::TestingEngine;
pub use report::{IterationReport, StepStats, TestReport};
