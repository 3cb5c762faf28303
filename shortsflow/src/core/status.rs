//! Stage status, run status and the run state machine.

use super::StageId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome class of a single stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage produced its value (possibly via a lower fallback tier).
    Success,
    /// A non-essential stage failed; the run continues without its output.
    RecoverableFailure,
    /// An essential stage failed, or the run was cancelled.
    FatalFailure,
    /// Stage was not executed because configuration disabled it.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RecoverableFailure => write!(f, "recoverable_failure"),
            Self::FatalFailure => write!(f, "fatal_failure"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the status indicates any kind of failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RecoverableFailure | Self::FatalFailure)
    }

    /// Returns true if the status terminates the run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalFailure)
    }
}

/// Overall status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every essential stage succeeded and nothing degraded.
    Completed,
    /// Every essential stage succeeded; some non-essential stage failed.
    Degraded,
    /// An essential stage failed or the run was cancelled.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// State of one run.
///
/// `Pending → Running(stage) → … → Completed | Degraded | Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stages", rename_all = "snake_case")]
pub enum RunState {
    /// Created, nothing executed yet.
    Pending,
    /// Executing one stage or one parallel group.
    Running(Vec<StageId>),
    /// Terminal: all essential stages succeeded without degradation.
    Completed,
    /// Terminal: finished with at least one non-essential failure.
    Degraded,
    /// Terminal: fatal failure or cancellation.
    Failed,
}

impl RunState {
    /// Returns true for `Completed`, `Degraded` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Degraded | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running(_) | Self::Failed) => true,
            (Self::Running(_), Self::Running(_) | Self::Completed | Self::Degraded | Self::Failed) => true,
            _ => false,
        }
    }

    /// Maps a terminal state to its run status.
    #[must_use]
    pub fn run_status(&self) -> Option<RunStatus> {
        match self {
            Self::Completed => Some(RunStatus::Completed),
            Self::Degraded => Some(RunStatus::Degraded),
            Self::Failed => Some(RunStatus::Failed),
            Self::Pending | Self::Running(_) => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running(stages) => {
                let names: Vec<_> = stages.iter().map(|s| s.as_str()).collect();
                write!(f, "running({})", names.join(" | "))
            }
            Self::Completed => write!(f, "completed"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_predicates() {
        assert!(StageStatus::Success.is_success());
        assert!(StageStatus::RecoverableFailure.is_failure());
        assert!(!StageStatus::RecoverableFailure.is_fatal());
        assert!(StageStatus::FatalFailure.is_fatal());
        assert!(!StageStatus::Skipped.is_failure());
    }

    #[test]
    fn test_run_state_transitions() {
        let running = RunState::Running(vec![StageId::GenerateNarrative]);
        assert!(RunState::Pending.can_transition_to(&running));
        assert!(running.can_transition_to(&RunState::Degraded));
        assert!(!RunState::Pending.can_transition_to(&RunState::Completed));
        assert!(!RunState::Completed.can_transition_to(&running));
        assert!(!RunState::Failed.can_transition_to(&RunState::Failed));
    }

    #[test]
    fn test_run_state_display() {
        let state = RunState::Running(vec![StageId::GenerateImages, StageId::SynthesizeVoice]);
        assert_eq!(state.to_string(), "running(generate_images | synthesize_voice)");
    }

    #[test]
    fn test_terminal_run_status() {
        assert_eq!(RunState::Degraded.run_status(), Some(RunStatus::Degraded));
        assert_eq!(RunState::Pending.run_status(), None);
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&StageStatus::RecoverableFailure).unwrap();
        assert_eq!(json, r#""recoverable_failure""#);
    }
}
