//! Scripted fake collaborators.

use crate::domain::{
    AssetKind, MediaHandle, Narrative, PublishReceipt, Topic, VideoMetadata, VoiceTrack,
};
use crate::errors::PipelineError;
use crate::ports::{
    AvatarAnimator, AvatarRequest, BackupRequest, BackupStore, ComposeRequest, ImageGenerator,
    ImageRequest, MetadataGenerator, MetadataRequest, NarrativeGenerator, NarrativeRequest,
    Notifier, PromptRequest, Publisher, TopicSource, TranscribeRequest, Transcriber,
    UploadRequest, VideoComposer, VoiceRequest, VoiceSynthesizer,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Per-method failure script and call counter.
///
/// Queued failures are returned first, one per call; after that the
/// permanent failure (if any) is returned forever; otherwise calls succeed.
#[derive(Debug, Default)]
pub struct CallScript {
    calls: AtomicU32,
    unloads: AtomicU32,
    queued: Mutex<VecDeque<PipelineError>>,
    always: Mutex<Option<PipelineError>>,
    delay: Mutex<Option<Duration>>,
}

impl CallScript {
    /// Fails the next `times` calls with `error`.
    pub fn fail_next(&self, times: usize, error: PipelineError) {
        let mut queued = self.queued.lock();
        queued.extend(std::iter::repeat(error).take(times));
    }

    /// Fails every call after the queued ones.
    pub fn fail_always(&self, error: PipelineError) {
        *self.always.lock() = Some(error);
    }

    /// Makes every call take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Calls so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Times the engine was asked to unload.
    #[must_use]
    pub fn unloads(&self) -> u32 {
        self.unloads.load(Ordering::SeqCst)
    }

    /// Records an unload.
    pub fn record_unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a call and returns its scripted outcome.
    pub async fn step(&self) -> Result<(), PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.queued.lock().pop_front() {
            return Err(error);
        }
        match self.always.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// In-memory topic queue recording status updates.
#[derive(Debug, Default)]
pub struct FakeTopicSource {
    script: CallScript,
    queue: Mutex<VecDeque<Topic>>,
    processing: Mutex<Vec<String>>,
    done: Mutex<Vec<String>>,
    failed: Mutex<Vec<(String, String)>>,
}

impl FakeTopicSource {
    /// Appends a topic to the queue.
    pub fn push(&self, topic: Topic) {
        self.queue.lock().push_back(topic);
    }

    /// Script for `fetch_next`.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }

    /// Topics marked processing.
    #[must_use]
    pub fn processing(&self) -> Vec<String> {
        self.processing.lock().clone()
    }

    /// Topics marked done.
    #[must_use]
    pub fn done(&self) -> Vec<String> {
        self.done.lock().clone()
    }

    /// Topics marked failed, with reasons.
    #[must_use]
    pub fn failed(&self) -> Vec<(String, String)> {
        self.failed.lock().clone()
    }
}

#[async_trait]
impl TopicSource for FakeTopicSource {
    async fn fetch_next(&self) -> Result<Option<Topic>, PipelineError> {
        self.script.step().await?;
        Ok(self.queue.lock().pop_front())
    }

    async fn mark_processing(&self, topic: &Topic) -> Result<(), PipelineError> {
        self.processing.lock().push(topic.text().to_string());
        Ok(())
    }

    async fn mark_done(&self, topic: &Topic) -> Result<(), PipelineError> {
        self.done.lock().push(topic.text().to_string());
        Ok(())
    }

    async fn mark_failed(&self, topic: &Topic, reason: &str) -> Result<(), PipelineError> {
        self.failed
            .lock()
            .push((topic.text().to_string(), reason.to_string()));
        Ok(())
    }
}

/// Produces a narrative of a fixed word count.
#[derive(Debug)]
pub struct FakeNarrative {
    script: CallScript,
    words: Mutex<usize>,
}

impl Default for FakeNarrative {
    fn default() -> Self {
        Self {
            script: CallScript::default(),
            words: Mutex::new(60),
        }
    }
}

impl FakeNarrative {
    /// Call script.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }

    /// Changes the generated word count.
    pub fn set_words(&self, words: usize) {
        *self.words.lock() = words;
    }
}

#[async_trait]
impl NarrativeGenerator for FakeNarrative {
    async fn generate(&self, request: NarrativeRequest) -> Result<Narrative, PipelineError> {
        self.script.step().await?;
        let words = *self.words.lock();
        let text = vec!["word"; words].join(" ");
        Ok(Narrative::new(text, request.language))
    }

    fn unload(&self) {
        self.script.record_unload();
    }
}

/// Echoes the topic as metadata and numbers the scene prompts.
#[derive(Debug, Default)]
pub struct FakeMetadata {
    script: CallScript,
}

impl FakeMetadata {
    /// Call script shared by both methods.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }
}

#[async_trait]
impl MetadataGenerator for FakeMetadata {
    async fn generate_metadata(
        &self,
        request: MetadataRequest,
    ) -> Result<VideoMetadata, PipelineError> {
        self.script.step().await?;
        Ok(VideoMetadata {
            title: request.topic.clone(),
            description: format!("All about {}", request.topic),
            tags: vec!["shorts".to_string()],
        })
    }

    async fn generate_image_prompts(
        &self,
        request: PromptRequest,
    ) -> Result<Vec<String>, PipelineError> {
        Ok((1..=request.scene_count)
            .map(|i| format!("scene {i}"))
            .collect())
    }

    fn unload(&self) {
        self.script.record_unload();
    }
}

/// One portrait image per prompt.
#[derive(Debug, Default)]
pub struct FakeImages {
    script: CallScript,
}

impl FakeImages {
    /// Call script.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate(&self, request: ImageRequest) -> Result<Vec<MediaHandle>, PipelineError> {
        self.script.step().await?;
        Ok((0..request.prompts.len())
            .map(|i| {
                MediaHandle::new(
                    request.output_dir.join(format!("scene_{i}.png")),
                    AssetKind::SceneImage,
                )
                .with_dimensions(1080, 1920)
            })
            .collect())
    }

    fn unload(&self) {
        self.script.record_unload();
    }
}

/// Fixed-length narration.
#[derive(Debug, Default)]
pub struct FakeVoice {
    script: CallScript,
}

impl FakeVoice {
    /// Call script.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }
}

#[async_trait]
impl VoiceSynthesizer for FakeVoice {
    async fn synthesize(&self, request: VoiceRequest) -> Result<VoiceTrack, PipelineError> {
        self.script.step().await?;
        Ok(VoiceTrack {
            audio: MediaHandle::new(request.output_path, AssetKind::VoiceAudio)
                .with_duration(42.0),
            voice_id: format!("{}-standard", request.language),
        })
    }
}

/// Avatar animator with separate scripts for each tier.
#[derive(Debug, Default)]
pub struct FakeAvatar {
    animate: CallScript,
    static_pan: CallScript,
}

impl FakeAvatar {
    /// Script for full animation; also counts unloads.
    #[must_use]
    pub fn animate_script(&self) -> &CallScript {
        &self.animate
    }

    /// Script for the static-pan tier.
    #[must_use]
    pub fn static_pan_script(&self) -> &CallScript {
        &self.static_pan
    }

    fn clip(request: &AvatarRequest) -> MediaHandle {
        MediaHandle::new(request.output_path.clone(), AssetKind::AvatarVideo)
            .with_duration(request.audio.duration_secs)
            .with_dimensions(1080, 1920)
    }
}

#[async_trait]
impl AvatarAnimator for FakeAvatar {
    async fn animate(&self, request: AvatarRequest) -> Result<MediaHandle, PipelineError> {
        self.animate.step().await?;
        Ok(Self::clip(&request))
    }

    async fn animate_static_pan(
        &self,
        request: AvatarRequest,
    ) -> Result<MediaHandle, PipelineError> {
        self.static_pan.step().await?;
        Ok(Self::clip(&request))
    }

    fn unload(&self) {
        self.animate.record_unload();
    }
}

/// Transcriber recording the model size of every call.
#[derive(Debug, Default)]
pub struct FakeTranscriber {
    script: CallScript,
    model_sizes: Mutex<Vec<String>>,
}

impl FakeTranscriber {
    /// Call script.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }

    /// Model sizes requested, in call order.
    #[must_use]
    pub fn model_sizes(&self) -> Vec<String> {
        self.model_sizes.lock().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, request: TranscribeRequest) -> Result<MediaHandle, PipelineError> {
        self.model_sizes.lock().push(request.model_size.clone());
        self.script.step().await?;
        Ok(MediaHandle::new(request.output_path, AssetKind::SubtitleFile))
    }

    fn unload(&self) {
        self.script.record_unload();
    }
}

/// Composer recording its requests.
#[derive(Debug, Default)]
pub struct FakeComposer {
    script: CallScript,
    requests: Mutex<Vec<ComposeRequest>>,
}

impl FakeComposer {
    /// Call script.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }

    /// Requests received.
    #[must_use]
    pub fn requests(&self) -> Vec<ComposeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl VideoComposer for FakeComposer {
    async fn compose(&self, request: ComposeRequest) -> Result<MediaHandle, PipelineError> {
        self.requests.lock().push(request.clone());
        self.script.step().await?;
        Ok(
            MediaHandle::new(request.output_path, AssetKind::ComposedVideo)
                .with_duration(request.duration_secs)
                .with_dimensions(1080, 1920),
        )
    }
}

/// Publisher recording its requests.
#[derive(Debug, Default)]
pub struct FakePublisher {
    script: CallScript,
    requests: Mutex<Vec<UploadRequest>>,
}

impl FakePublisher {
    /// Call script.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }

    /// Requests received.
    #[must_use]
    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn upload(&self, request: UploadRequest) -> Result<PublishReceipt, PipelineError> {
        self.requests.lock().push(request.clone());
        self.script.step().await?;
        Ok(PublishReceipt {
            url: "https://youtu.be/fake".to_string(),
            scheduled_at: request.scheduled_at,
        })
    }
}

/// Backup store answering with a folder named after the key.
#[derive(Debug, Default)]
pub struct FakeBackup {
    script: CallScript,
}

impl FakeBackup {
    /// Call script.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }
}

#[async_trait]
impl BackupStore for FakeBackup {
    async fn save(&self, request: BackupRequest) -> Result<String, PipelineError> {
        self.script.step().await?;
        Ok(format!("drive://shorts/{}", request.key))
    }
}

/// Notifier recording delivered messages.
#[derive(Debug, Default)]
pub struct FakeNotifier {
    script: CallScript,
    messages: Mutex<Vec<String>>,
}

impl FakeNotifier {
    /// Call script.
    #[must_use]
    pub fn script(&self) -> &CallScript {
        &self.script
    }

    /// Messages delivered.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, message: String) -> Result<(), PipelineError> {
        self.script.step().await?;
        self.messages.lock().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[tokio::test]
    async fn test_call_script_order() {
        let script = CallScript::default();
        script.fail_next(2, PipelineError::transient(ErrorKind::Upload, "503"));

        assert!(script.step().await.is_err());
        assert!(script.step().await.is_err());
        assert!(script.step().await.is_ok());

        script.fail_always(PipelineError::permanent(ErrorKind::Upload, "quota"));
        let err = script.step().await.unwrap_err();
        assert_eq!(err.message, "quota");
        assert_eq!(script.calls(), 4);
    }

    #[tokio::test]
    async fn test_topic_queue_drains_in_order() {
        let source = FakeTopicSource::default();
        source.push(Topic::new("first", crate::domain::Language::English).unwrap());
        source.push(Topic::new("second", crate::domain::Language::Tamil).unwrap());

        let first = source.fetch_next().await.unwrap().unwrap();
        let second = source.fetch_next().await.unwrap().unwrap();
        assert_eq!((first.text(), second.text()), ("first", "second"));
        assert!(source.fetch_next().await.unwrap().is_none());
    }
}
