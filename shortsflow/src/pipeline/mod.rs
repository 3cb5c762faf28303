//! Pipeline orchestration.
//!
//! This module contains:
//! - The fixed stage graph and its causal order
//! - The orchestrator that drives one topic through every stage group
//! - Failure bookkeeping and the final run outcome

mod failure_collector;
mod graph;
mod orchestrator;
mod outcome;

#[cfg(test)]
mod integration_tests;

pub use failure_collector::{FailureCollector, FailureRecord, FailureSummary};
pub use graph::StageGraph;
pub use orchestrator::Orchestrator;
pub use outcome::{DrainError, PipelineOutcome};
