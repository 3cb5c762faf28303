//! Final record of one run.

use super::failure_collector::FailureSummary;
use crate::core::{RunState, RunStatus, StageId};
use crate::domain::Topic;
use crate::errors::PipelineError;
use crate::executor::StageResult;
use crate::observability::StageTiming;
use crate::work_item::WorkItem;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A queue read failed partway through a drain.
#[derive(Debug, Error)]
#[error("drain stopped after {} finished topic(s): {source}", .completed.len())]
pub struct DrainError {
    /// Outcomes of the topics finished before the failure.
    pub completed: Vec<PipelineOutcome>,
    /// The queue read failure.
    pub source: PipelineError,
}

/// Everything a finished run reports. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub(crate) run_id: Uuid,
    pub(crate) topic: Topic,
    pub(crate) status: RunStatus,
    pub(crate) work_item: Option<WorkItem>,
    pub(crate) stages: Vec<StageResult>,
    pub(crate) states: Vec<RunState>,
    pub(crate) degraded: Vec<StageId>,
    pub(crate) error: Option<PipelineError>,
    pub(crate) failures: FailureSummary,
    pub(crate) timings: Vec<StageTiming>,
    pub(crate) elapsed: Duration,
}

impl PipelineOutcome {
    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The topic, with its final status.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Overall status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns true for Completed and Degraded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Degraded)
    }

    /// Returns true if the run ended because it was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(PipelineError::is_cancellation)
    }

    /// Terminal work item. Withheld when the run was cancelled.
    #[must_use]
    pub fn work_item(&self) -> Option<&WorkItem> {
        self.work_item.as_ref()
    }

    /// Stage results in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    /// Result of one stage, if it ran (or was skipped).
    #[must_use]
    pub fn stage(&self, stage: StageId) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage() == stage)
    }

    /// Every state the run passed through, starting with Pending.
    #[must_use]
    pub fn states(&self) -> &[RunState] {
        &self.states
    }

    /// Non-essential stages that failed.
    #[must_use]
    pub fn degraded(&self) -> &[StageId] {
        &self.degraded
    }

    /// The fatal error, for failed runs.
    #[must_use]
    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// Failure summary.
    #[must_use]
    pub fn failures(&self) -> &FailureSummary {
        &self.failures
    }

    /// Per-stage timings in completion order.
    #[must_use]
    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    /// Total run time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Compact JSON summary used in the completion event.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "run_id": self.run_id.to_string(),
            "topic": self.topic.text(),
            "status": self.status,
            "degraded": self.degraded,
            "error": self.error.as_ref().map(PipelineError::to_json),
            "elapsed_ms": u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
            "stages": self.stages.iter().map(|r| json!({
                "stage": r.stage(),
                "status": r.status(),
                "tier": r.tier(),
                "attempts": r.total_attempts(),
            })).collect::<Vec<_>>(),
        })
    }
}
