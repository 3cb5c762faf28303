//! Error types for the shortsflow engine.
//!
//! Stage failures are represented by [`PipelineError`], a tagged value carrying
//! its [`ErrorKind`] family, the stage that produced it, whether it may be
//! retried and whether its stage is essential. The retry policy and the
//! orchestrator pattern-match on these fields instead of on error types.

use crate::core::StageId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for shortsflow operations outside a single stage.
#[derive(Debug, Error)]
pub enum ShortsflowError {
    /// A stage or pipeline failure.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A work item invariant was violated.
    #[error("{0}")]
    WorkItem(#[from] WorkItemError),
}

/// Error family, one per stage family plus the cross-cutting kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid configuration.
    Configuration,
    /// The topic queue could not be read or updated.
    TopicFetch,
    /// Narrative, metadata or prompt generation failed.
    NarrativeGeneration,
    /// Voice synthesis failed.
    VoiceGeneration,
    /// Avatar animation failed.
    AvatarAnimation,
    /// Subtitle transcription failed.
    Subtitle,
    /// Background or scene image generation failed.
    ImageGeneration,
    /// Video composition failed.
    VideoComposition,
    /// Upload to the publishing platform failed.
    Upload,
    /// Backup storage failed.
    Backup,
    /// Notification delivery failed.
    Notification,
    /// The run was cancelled.
    Cancelled,
}

impl ErrorKind {
    /// Returns the stable string name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::TopicFetch => "topic_fetch",
            Self::NarrativeGeneration => "narrative_generation",
            Self::VoiceGeneration => "voice_generation",
            Self::AvatarAnimation => "avatar_animation",
            Self::Subtitle => "subtitle",
            Self::ImageGeneration => "image_generation",
            Self::VideoComposition => "video_composition",
            Self::Upload => "upload",
            Self::Backup => "backup",
            Self::Notification => "notification",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn stage_suffix(stage: &Option<StageId>) -> String {
    stage.map(|s| format!(" in stage '{s}'")).unwrap_or_default()
}

/// A classified failure surfaced by a collaborator or by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure{}: {message}", stage_suffix(.stage))]
pub struct PipelineError {
    /// The error family.
    pub kind: ErrorKind,
    /// The stage that produced the error, once known.
    pub stage: Option<StageId>,
    /// Whether another attempt may succeed.
    pub retryable: bool,
    /// Whether the producing stage is essential to the run.
    pub essential: bool,
    /// Human-readable detail.
    pub message: String,
}

impl PipelineError {
    /// Creates a non-retryable error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: None,
            retryable: false,
            essential: true,
            message: message.into(),
        }
    }

    /// Creates a retryable error (network blip, busy service, out of memory).
    #[must_use]
    pub fn transient(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::new(kind, message)
        }
    }

    /// Creates a non-retryable error (malformed input, authentication failure).
    #[must_use]
    pub fn permanent(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, reason)
    }

    /// Creates an error attributed to `stage`, using the stage's error family.
    #[must_use]
    pub fn for_stage(stage: StageId, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            retryable,
            ..Self::new(stage.error_kind(), message)
        }
        .with_stage(stage)
    }

    /// Attributes the error to a stage and adopts its essential flag.
    ///
    /// An already attributed error keeps its original stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageId) -> Self {
        if self.stage.is_none() {
            self.stage = Some(stage);
            self.essential = stage.is_essential();
        }
        self
    }

    /// Returns true if this error represents a cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Converts to a JSON value for event payloads.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind.as_str(),
            "stage": self.stage.map(StageId::as_str),
            "retryable": self.retryable,
            "essential": self.essential,
            "message": self.message,
        })
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        Self::permanent(ErrorKind::Configuration, err.to_string())
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the settings schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    Invalid {
        /// The offending field.
        field: String,
        /// Why it is invalid.
        message: String,
    },

    /// An engine name is not registered for a capability.
    #[error("Unknown {capability} engine '{name}'")]
    UnknownEngine {
        /// The capability being resolved.
        capability: &'static str,
        /// The unregistered engine name.
        name: String,
    },

    /// A capability has no engine configured at all.
    #[error("No engine configured for {capability}")]
    MissingCapability {
        /// The capability being resolved.
        capability: &'static str,
    },
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Violations of the work item's write-once and causal-read invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkItemError {
    /// A field was written twice.
    #[error("Work item field '{field}' is already set")]
    FieldAlreadySet {
        /// The field name.
        field: &'static str,
    },

    /// A stage read a field produced by a stage that does not precede it.
    #[error("Stage '{reader}' cannot read '{field}': producer '{producer}' does not precede it")]
    CausalViolation {
        /// The reading stage.
        reader: StageId,
        /// The field name.
        field: &'static str,
        /// The stage producing the field.
        producer: StageId,
    },

    /// A required field has not been produced.
    #[error("Stage '{reader}' requires '{field}', which has not been produced")]
    NotYetProduced {
        /// The reading stage.
        reader: StageId,
        /// The field name.
        field: &'static str,
    },
}

impl From<WorkItemError> for PipelineError {
    fn from(err: WorkItemError) -> Self {
        let stage = match &err {
            WorkItemError::CausalViolation { reader, .. }
            | WorkItemError::NotYetProduced { reader, .. } => Some(*reader),
            WorkItemError::FieldAlreadySet { .. } => None,
        };
        let error = Self::permanent(ErrorKind::Configuration, err.to_string());
        match stage {
            Some(stage) => Self {
                stage: Some(stage),
                essential: stage.is_essential(),
                ..error
            },
            None => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = PipelineError::transient(ErrorKind::Upload, "503 from upstream");
        assert!(err.retryable);
        assert!(err.essential);
        assert!(err.stage.is_none());
    }

    #[test]
    fn test_for_stage_uses_stage_family() {
        let err = PipelineError::for_stage(StageId::Notify, true, "chat API down");
        assert_eq!(err.kind, ErrorKind::Notification);
        assert_eq!(err.stage, Some(StageId::Notify));
        assert!(!err.essential);
    }

    #[test]
    fn test_with_stage_keeps_first_attribution() {
        let err = PipelineError::permanent(ErrorKind::Subtitle, "bad audio")
            .with_stage(StageId::TranscribeSubtitles)
            .with_stage(StageId::ComposeVideo);
        assert_eq!(err.stage, Some(StageId::TranscribeSubtitles));
        assert!(!err.essential);
    }

    #[test]
    fn test_display_includes_stage() {
        let err = PipelineError::for_stage(StageId::AnimateAvatar, false, "no face found");
        assert_eq!(
            err.to_string(),
            "avatar_animation failure in stage 'animate_avatar': no face found"
        );
        let bare = PipelineError::cancelled("shutdown");
        assert_eq!(bare.to_string(), "cancelled failure: shutdown");
    }

    #[test]
    fn test_cancellation_is_not_retryable() {
        let err = PipelineError::cancelled("signal");
        assert!(err.is_cancellation());
        assert!(!err.retryable);
    }

    #[test]
    fn test_config_error_maps_to_configuration_kind() {
        let err: PipelineError = ConfigError::UnknownEngine {
            capability: "voice",
            name: "robot".to_string(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(!err.retryable);
        assert!(err.message.contains("robot"));
    }

    #[test]
    fn test_work_item_error_attributes_reader() {
        let err: PipelineError = WorkItemError::NotYetProduced {
            reader: StageId::ComposeVideo,
            field: "avatar",
        }
        .into();
        assert_eq!(err.stage, Some(StageId::ComposeVideo));
        assert!(err.message.contains("avatar"));
    }

    #[test]
    fn test_to_json() {
        let err = PipelineError::for_stage(StageId::Upload, true, "quota");
        let json = err.to_json();
        assert_eq!(json["kind"], "upload");
        assert_eq!(json["stage"], "upload");
        assert_eq!(json["retryable"], true);
    }
}
