//! Failure bookkeeping for one run.
//!
//! Records every stage failure, separates the recoverable ones (the run
//! continues degraded) from the fatal ones (nothing further is scheduled), and
//! derives the final [`RunStatus`].

use crate::core::{RunStatus, StageId, StageStatus};
use crate::errors::PipelineError;
use crate::executor::StageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Record of a stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The failed stage.
    pub stage: StageId,
    /// What went wrong.
    pub error: PipelineError,
    /// Whether the run continued.
    pub recoverable: bool,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(stage: StageId, error: PipelineError, recoverable: bool) -> Self {
        Self {
            stage,
            error,
            recoverable,
            timestamp: Utc::now(),
        }
    }
}

/// Summary of failures during one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Stages that reported a result.
    pub total_stages: usize,
    /// Stages that succeeded.
    pub completed_stages: usize,
    /// Stages that failed.
    pub failed_stages: usize,
    /// Stages disabled by configuration.
    pub skipped_stages: usize,
    /// Failures, in recording order.
    pub failures: Vec<FailureRecord>,
}

impl FailureSummary {
    /// Fraction of reported stages that succeeded.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        self.completed_stages as f64 / self.total_stages as f64
    }

    /// Returns true if any stage failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Collects stage outcomes as a run progresses.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Vec<FailureRecord>,
    completed: BTreeSet<StageId>,
    skipped: BTreeSet<StageId>,
}

impl FailureCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one stage outcome.
    pub fn record<T>(&mut self, result: &StageResult<T>) {
        let stage = result.stage();
        match result.status() {
            StageStatus::Success => {
                self.completed.insert(stage);
            }
            StageStatus::Skipped => {
                self.skipped.insert(stage);
            }
            status @ (StageStatus::RecoverableFailure | StageStatus::FatalFailure) => {
                let error = result
                    .error()
                    .cloned()
                    .unwrap_or_else(|| PipelineError::for_stage(stage, false, "failed"));
                self.failures.push(FailureRecord::new(
                    stage,
                    error,
                    status == StageStatus::RecoverableFailure,
                ));
            }
        }
    }

    /// Returns true once a fatal failure was recorded.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.failures.iter().any(|f| !f.recoverable)
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn has_failed(&self, stage: StageId) -> bool {
        self.failures.iter().any(|f| f.stage == stage)
    }

    /// Non-essential stages that failed, in recording order.
    #[must_use]
    pub fn degraded(&self) -> Vec<StageId> {
        self.failures
            .iter()
            .filter(|f| f.recoverable)
            .map(|f| f.stage)
            .collect()
    }

    /// The first fatal failure.
    #[must_use]
    pub fn fatal(&self) -> Option<&FailureRecord> {
        self.failures.iter().find(|f| !f.recoverable)
    }

    /// Every failure recorded.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Status implied by what has been recorded so far.
    #[must_use]
    pub fn run_status(&self) -> RunStatus {
        if self.should_stop() {
            RunStatus::Failed
        } else if self.failures.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::Degraded
        }
    }

    /// Summary of the run so far.
    #[must_use]
    pub fn summary(&self) -> FailureSummary {
        let failed: BTreeSet<_> = self.failures.iter().map(|f| f.stage).collect();
        FailureSummary {
            total_stages: self.completed.len() + self.skipped.len() + failed.len(),
            completed_stages: self.completed.len(),
            failed_stages: failed.len(),
            skipped_stages: self.skipped.len(),
            failures: self.failures.clone(),
        }
    }
}
