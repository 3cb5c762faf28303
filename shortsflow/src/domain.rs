//! Domain values passed between stages.
//!
//! The orchestrator treats these as opaque payloads apart from the few fields
//! it needs to sequence the next stage (paths, durations, word counts).

use crate::errors::{ConfigError, ErrorKind, PipelineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Target content language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    /// Tamil.
    #[serde(rename = "ta")]
    Tamil,
    /// English.
    #[default]
    #[serde(rename = "en")]
    English,
    /// Hindi.
    #[serde(rename = "hi")]
    Hindi,
    /// Tamil and English.
    #[serde(rename = "both")]
    Both,
}

impl Language {
    /// All supported languages.
    pub const ALL: [Self; 4] = [Self::Tamil, Self::English, Self::Hindi, Self::Both];

    /// Language code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Tamil => "ta",
            Self::English => "en",
            Self::Hindi => "hi",
            Self::Both => "both",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Tamil => "Tamil",
            Self::English => "English",
            Self::Hindi => "Hindi",
            Self::Both => "Both (Tamil + English)",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    /// Parses a language code, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|l| l.code() == normalized)
            .ok_or_else(|| {
                let supported: Vec<_> = Self::ALL.iter().map(|l| l.code()).collect();
                ConfigError::invalid(
                    "language",
                    format!("unsupported language '{s}', supported: {}", supported.join(", ")),
                )
            })
    }
}

/// Processing status of a queued topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// Claimed by a run.
    Processing,
    /// Run finished (completed or degraded).
    Done,
    /// Run failed.
    Failed,
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Processing => write!(f, "Processing"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// A queued topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTopic")]
pub struct Topic {
    /// Source-specific identifier (e.g. row number), if any.
    pub id: Option<u64>,
    text: String,
    /// Target language.
    pub language: Language,
    status: TopicStatus,
}

/// Wire form of [`Topic`], checked on the way in.
#[derive(Deserialize)]
struct RawTopic {
    id: Option<u64>,
    text: String,
    language: Language,
    status: TopicStatus,
}

impl TryFrom<RawTopic> for Topic {
    type Error = PipelineError;

    fn try_from(raw: RawTopic) -> Result<Self, Self::Error> {
        let mut topic = Self::new(raw.text, raw.language)?;
        topic.id = raw.id;
        topic.status = raw.status;
        Ok(topic)
    }
}

impl Topic {
    /// Creates a pending topic. Blank text is rejected.
    pub fn new(text: impl Into<String>, language: Language) -> Result<Self, PipelineError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(PipelineError::permanent(
                ErrorKind::TopicFetch,
                "Topic text cannot be empty",
            ));
        }
        Ok(Self {
            id: None,
            text,
            language,
            status: TopicStatus::Pending,
        })
    }

    /// Sets the source identifier.
    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Topic text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TopicStatus {
        self.status
    }

    /// Marks the topic as claimed by a run.
    pub fn mark_processing(&mut self) {
        self.status = TopicStatus::Processing;
    }

    /// Marks the topic as done.
    pub fn mark_done(&mut self) {
        self.status = TopicStatus::Done;
    }

    /// Marks the topic as failed.
    pub fn mark_failed(&mut self) {
        self.status = TopicStatus::Failed;
    }
}

/// Generated narrative script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narrative {
    /// Spoken script.
    pub text: String,
    /// Language of the script.
    pub language: Language,
    /// Whitespace-separated word count.
    pub word_count: usize,
    /// When the script was produced.
    pub generated_at: DateTime<Utc>,
}

impl Narrative {
    /// Creates a narrative, counting its words.
    #[must_use]
    pub fn new(text: impl Into<String>, language: Language) -> Self {
        let text = text.into();
        let word_count = text.split_whitespace().count();
        Self {
            text,
            language,
            word_count,
            generated_at: Utc::now(),
        }
    }

    /// Checks the word count against `[min_words, max_words]`.
    ///
    /// A script outside the bounds is malformed output and is not retried.
    pub fn validate(&self, min_words: usize, max_words: usize) -> Result<(), PipelineError> {
        if self.word_count < min_words {
            return Err(PipelineError::permanent(
                ErrorKind::NarrativeGeneration,
                format!(
                    "Narrative too short ({} words, minimum {min_words})",
                    self.word_count
                ),
            ));
        }
        if self.word_count > max_words {
            return Err(PipelineError::permanent(
                ErrorKind::NarrativeGeneration,
                format!(
                    "Narrative too long ({} words, maximum {max_words})",
                    self.word_count
                ),
            ));
        }
        Ok(())
    }
}

/// Publishing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Video title.
    pub title: String,
    /// Video description.
    pub description: String,
    /// Search tags.
    pub tags: Vec<String>,
}

/// Category of a generated media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Talking-head clip.
    AvatarVideo,
    /// Per-scene still image.
    SceneImage,
    /// Narration audio.
    VoiceAudio,
    /// Subtitle track.
    SubtitleFile,
    /// Final composed video.
    ComposedVideo,
}

/// Handle to a media file produced by a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaHandle {
    /// File location.
    pub path: PathBuf,
    /// What the file is.
    pub kind: AssetKind,
    /// Duration in seconds for timed media, zero otherwise.
    pub duration_secs: f64,
    /// Width in pixels, zero if not applicable.
    pub width: u32,
    /// Height in pixels, zero if not applicable.
    pub height: u32,
}

impl MediaHandle {
    /// Creates a handle with no duration or dimensions.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: AssetKind) -> Self {
        Self {
            path: path.into(),
            kind,
            duration_secs: 0.0,
            width: 0,
            height: 0,
        }
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Sets the pixel dimensions.
    #[must_use]
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// File location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Synthesized narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceTrack {
    /// Audio file.
    pub audio: MediaHandle,
    /// Voice identifier used by the engine.
    pub voice_id: String,
}

impl VoiceTrack {
    /// Audio duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.audio.duration_secs
    }
}

/// Privacy setting for a published video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    /// Visible to everyone.
    Public,
    /// Visible only to the owner.
    #[default]
    Private,
    /// Reachable by link.
    Unlisted,
}

/// Confirmation of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// Public URL of the video.
    pub url: String,
    /// Scheduled publish time, if the upload was scheduled.
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parse() {
        assert_eq!(" TA ".parse::<Language>().unwrap(), Language::Tamil);
        assert_eq!("both".parse::<Language>().unwrap(), Language::Both);
        let err = "fr".parse::<Language>().unwrap_err();
        assert!(err.to_string().contains("ta, en, hi, both"));
    }

    #[test]
    fn test_language_serde_uses_codes() {
        assert_eq!(serde_json::to_string(&Language::Hindi).unwrap(), r#""hi""#);
        assert_eq!(Language::Both.display_name(), "Both (Tamil + English)");
    }

    #[test]
    fn test_blank_topic_rejected() {
        let err = Topic::new("   ", Language::English).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TopicFetch);
        assert!(!err.retryable);
    }

    #[test]
    fn test_topic_deserialize_checks_text() {
        let blank = r#"{"id":7,"text":"  ","language":"en","status":"pending"}"#;
        let err = serde_json::from_str::<Topic>(blank).unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));

        let ok = r#"{"id":7,"text":"Monsoon clouds","language":"ta","status":"processing"}"#;
        let topic: Topic = serde_json::from_str(ok).unwrap();
        assert_eq!(topic.text(), "Monsoon clouds");
        assert_eq!(topic.language, Language::Tamil);
        assert_eq!(topic.status(), TopicStatus::Processing);
        assert_eq!(topic.id, Some(7));
    }

    #[test]
    fn test_topic_lifecycle() {
        let mut topic = Topic::new("Why the sky is blue", Language::English)
            .unwrap()
            .with_id(4);
        assert_eq!(topic.status(), TopicStatus::Pending);
        topic.mark_processing();
        assert_eq!(topic.status(), TopicStatus::Processing);
        topic.mark_done();
        assert_eq!(topic.status(), TopicStatus::Done);
        assert_eq!(topic.id, Some(4));
    }

    #[test]
    fn test_narrative_word_bounds() {
        let narrative = Narrative::new("one two  three\nfour", Language::English);
        assert_eq!(narrative.word_count, 4);
        assert!(narrative.validate(1, 10).is_ok());

        let short = narrative.validate(30, 200).unwrap_err();
        assert_eq!(short.kind, ErrorKind::NarrativeGeneration);
        assert!(!short.retryable);
        assert!(short.message.contains("too short"));

        let long = narrative.validate(1, 3).unwrap_err();
        assert!(long.message.contains("too long"));
    }

    #[test]
    fn test_media_handle_builders() {
        let clip = MediaHandle::new("/tmp/avatar.mp4", AssetKind::AvatarVideo)
            .with_duration(42.5)
            .with_dimensions(1080, 1920);
        assert_eq!(clip.path(), Path::new("/tmp/avatar.mp4"));
        assert!((clip.duration_secs - 42.5).abs() < f64::EPSILON);
        assert_eq!((clip.width, clip.height), (1080, 1920));
    }
}
