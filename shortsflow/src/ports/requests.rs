//! Request payloads handed to collaborators.

use crate::domain::{Language, MediaHandle, Privacy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Input to narrative generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeRequest {
    /// Topic text.
    pub topic: String,
    /// Target language.
    pub language: Language,
    /// Lower word bound the script should respect.
    pub min_words: usize,
    /// Upper word bound the script should respect.
    pub max_words: usize,
}

/// Input to metadata generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRequest {
    /// Topic text.
    pub topic: String,
    /// Target language.
    pub language: Language,
    /// The narrative script.
    pub narrative: String,
}

/// Input to image prompt generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    /// The narrative script.
    pub narrative: String,
    /// Number of scene prompts wanted.
    pub scene_count: usize,
}

/// Input to scene image generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// One prompt per scene.
    pub prompts: Vec<String>,
    /// Directory for the images.
    pub output_dir: PathBuf,
}

/// Input to voice synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRequest {
    /// Text to speak.
    pub text: String,
    /// Spoken language.
    pub language: Language,
    /// Where to write the audio.
    pub output_path: PathBuf,
}

/// Input to avatar animation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarRequest {
    /// Narration to lip-sync.
    pub audio: MediaHandle,
    /// Source portrait.
    pub image_path: PathBuf,
    /// Where to write the clip.
    pub output_path: PathBuf,
}

/// Input to transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeRequest {
    /// Narration to transcribe.
    pub audio: MediaHandle,
    /// Spoken language.
    pub language: Language,
    /// Speech model size for this tier.
    pub model_size: String,
    /// Where to write the subtitle track.
    pub output_path: PathBuf,
}

/// Input to video composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeRequest {
    /// Talking-head clip.
    pub avatar: MediaHandle,
    /// Scene images.
    pub scene_images: Vec<MediaHandle>,
    /// Narration.
    pub audio: MediaHandle,
    /// Subtitle track; `None` when transcription degraded.
    pub subtitles: Option<MediaHandle>,
    /// Where to write the video.
    pub output_path: PathBuf,
    /// Target duration in seconds.
    pub duration_secs: f64,
}

/// Input to upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Video to upload.
    pub video: MediaHandle,
    /// Video title.
    pub title: String,
    /// Video description.
    pub description: String,
    /// Search tags.
    pub tags: Vec<String>,
    /// Privacy setting.
    pub privacy: Privacy,
    /// Use a resumable session.
    pub resumable: bool,
    /// Chunk size for resumable uploads.
    pub chunk_size_bytes: u64,
    /// Publish time, if scheduled.
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Input to backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRequest {
    /// Video to copy.
    pub video: MediaHandle,
    /// Workspace key used as the remote folder name.
    pub key: String,
}
