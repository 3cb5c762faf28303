//! Collaborator interfaces.
//!
//! One trait per external subsystem. The orchestrator depends only on these
//! traits; concrete engines are resolved once at startup by the
//! [`CapabilityRegistry`](crate::registry::CapabilityRegistry). Every method
//! reports failures as a [`PipelineError`] tagged with its retryable flag.
//!
//! Engines that hold models on the accelerator expose `unload`, which the
//! orchestrator calls when the lease manager evicts them.

mod requests;

pub use requests::{
    AvatarRequest, BackupRequest, ComposeRequest, ImageRequest, MetadataRequest,
    NarrativeRequest, PromptRequest, TranscribeRequest, UploadRequest, VoiceRequest,
};

use crate::domain::{MediaHandle, Narrative, PublishReceipt, Topic, VideoMetadata, VoiceTrack};
use crate::errors::PipelineError;
use async_trait::async_trait;

/// The topic queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicSource: Send + Sync {
    /// Returns the next pending topic, or `None` when the queue is empty.
    async fn fetch_next(&self) -> Result<Option<Topic>, PipelineError>;

    /// Marks a topic as claimed.
    async fn mark_processing(&self, topic: &Topic) -> Result<(), PipelineError>;

    /// Marks a topic as finished.
    async fn mark_done(&self, topic: &Topic) -> Result<(), PipelineError>;

    /// Marks a topic as failed.
    async fn mark_failed(&self, topic: &Topic, reason: &str) -> Result<(), PipelineError>;
}

/// Narrative script generation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    /// Generates a script for the topic.
    async fn generate(&self, request: NarrativeRequest) -> Result<Narrative, PipelineError>;

    /// Frees the loaded language model.
    fn unload(&self) {}
}

/// Publishing metadata and image prompt generation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataGenerator: Send + Sync {
    /// Generates title, description and tags.
    async fn generate_metadata(&self, request: MetadataRequest)
        -> Result<VideoMetadata, PipelineError>;

    /// Generates one image prompt per scene.
    async fn generate_image_prompts(
        &self,
        request: PromptRequest,
    ) -> Result<Vec<String>, PipelineError>;

    /// Frees the loaded language model.
    fn unload(&self) {}
}

/// Scene image generation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Renders one image per prompt.
    async fn generate(&self, request: ImageRequest) -> Result<Vec<MediaHandle>, PipelineError>;

    /// Frees the diffusion pipeline.
    fn unload(&self) {}
}

/// Text-to-speech.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    /// Speaks the text.
    async fn synthesize(&self, request: VoiceRequest) -> Result<VoiceTrack, PipelineError>;
}

/// Talking-head animation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvatarAnimator: Send + Sync {
    /// Full lip-synced animation.
    async fn animate(&self, request: AvatarRequest) -> Result<MediaHandle, PipelineError>;

    /// Lower tier: the portrait with a slow pan, timed to the audio.
    async fn animate_static_pan(&self, request: AvatarRequest)
        -> Result<MediaHandle, PipelineError>;

    /// Frees the animation models.
    fn unload(&self) {}
}

/// Speech-to-text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Produces a subtitle track using the requested model size.
    async fn transcribe(&self, request: TranscribeRequest) -> Result<MediaHandle, PipelineError>;

    /// Frees the speech model.
    fn unload(&self) {}
}

/// Final video muxing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoComposer: Send + Sync {
    /// Composes the final video.
    async fn compose(&self, request: ComposeRequest) -> Result<MediaHandle, PipelineError>;
}

/// Upload to the publishing platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Uploads and optionally schedules the video.
    async fn upload(&self, request: UploadRequest) -> Result<PublishReceipt, PipelineError>;
}

/// Backup storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Copies the video and returns its backup location.
    async fn save(&self, request: BackupRequest) -> Result<String, PipelineError>;
}

/// Chat notification.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a message.
    async fn send(&self, message: String) -> Result<(), PipelineError>;
}
