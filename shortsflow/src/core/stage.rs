//! Stage identifiers.

use crate::errors::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of the fixed video pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Dequeue the next topic from the topic source.
    FetchTopic,
    /// Generate the narrative script.
    GenerateNarrative,
    /// Generate publishing metadata and image prompts.
    GenerateMetadata,
    /// Generate the scene images.
    GenerateImages,
    /// Synthesize the voice track.
    SynthesizeVoice,
    /// Animate the talking avatar.
    AnimateAvatar,
    /// Transcribe the voice track into subtitles.
    TranscribeSubtitles,
    /// Compose the final video.
    ComposeVideo,
    /// Upload to the publishing platform.
    Upload,
    /// Copy the composed video to backup storage.
    Backup,
    /// Send the completion notification.
    Notify,
}

impl StageId {
    /// All stages in pipeline order.
    pub const ALL: [Self; 11] = [
        Self::FetchTopic,
        Self::GenerateNarrative,
        Self::GenerateMetadata,
        Self::GenerateImages,
        Self::SynthesizeVoice,
        Self::AnimateAvatar,
        Self::TranscribeSubtitles,
        Self::ComposeVideo,
        Self::Upload,
        Self::Backup,
        Self::Notify,
    ];

    /// Returns the stable string name of the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FetchTopic => "fetch_topic",
            Self::GenerateNarrative => "generate_narrative",
            Self::GenerateMetadata => "generate_metadata",
            Self::GenerateImages => "generate_images",
            Self::SynthesizeVoice => "synthesize_voice",
            Self::AnimateAvatar => "animate_avatar",
            Self::TranscribeSubtitles => "transcribe_subtitles",
            Self::ComposeVideo => "compose_video",
            Self::Upload => "upload",
            Self::Backup => "backup",
            Self::Notify => "notify",
        }
    }

    /// Parses a stage from its string name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Whether an exhausted failure of this stage aborts the run.
    ///
    /// Subtitles, backup and notification degrade the run instead.
    #[must_use]
    pub const fn is_essential(self) -> bool {
        !matches!(
            self,
            Self::TranscribeSubtitles | Self::Backup | Self::Notify
        )
    }

    /// The error family reported for failures of this stage.
    #[must_use]
    pub const fn error_kind(self) -> ErrorKind {
        match self {
            Self::FetchTopic => ErrorKind::TopicFetch,
            Self::GenerateNarrative | Self::GenerateMetadata => ErrorKind::NarrativeGeneration,
            Self::GenerateImages => ErrorKind::ImageGeneration,
            Self::SynthesizeVoice => ErrorKind::VoiceGeneration,
            Self::AnimateAvatar => ErrorKind::AvatarAnimation,
            Self::TranscribeSubtitles => ErrorKind::Subtitle,
            Self::ComposeVideo => ErrorKind::VideoComposition,
            Self::Upload => ErrorKind::Upload,
            Self::Backup => ErrorKind::Backup,
            Self::Notify => ErrorKind::Notification,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
