//! Per-run accumulating state.
//!
//! A [`WorkItem`] is created when a topic is claimed and is owned by exactly
//! one run. Every field is a write-once [`Slot`]; stages read through a
//! [`StageInputs`] view that refuses fields whose producer does not causally
//! precede the reader.

use crate::core::{StageId, StageStatus};
use crate::domain::{MediaHandle, Narrative, PublishReceipt, Topic, VideoMetadata, VoiceTrack};
use crate::errors::WorkItemError;
use crate::pipeline::StageGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Length of the hex workspace key.
const WORKSPACE_KEY_LEN: usize = 12;

/// A value that can be set at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot<T> {
    value: Option<T>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T> Slot<T> {
    /// Sets the value, failing if already set.
    pub fn set(&mut self, field: &'static str, value: T) -> Result<(), WorkItemError> {
        if self.value.is_some() {
            return Err(WorkItemError::FieldAlreadySet { field });
        }
        self.value = Some(value);
        Ok(())
    }

    /// Returns the value, if set.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Returns true if set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

/// Fields of the work item, each with its single producing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkField {
    /// The claimed topic.
    Topic,
    /// Narrative script.
    Narrative,
    /// Publishing metadata.
    Metadata,
    /// Per-scene image prompts.
    ImagePrompts,
    /// Per-scene images.
    SceneImages,
    /// Narration track.
    Voice,
    /// Talking-head clip.
    Avatar,
    /// Subtitle track.
    Subtitles,
    /// Final video.
    ComposedVideo,
    /// Upload receipt.
    Publish,
    /// Backup location.
    Backup,
}

impl WorkField {
    /// Field name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Narrative => "narrative",
            Self::Metadata => "metadata",
            Self::ImagePrompts => "image_prompts",
            Self::SceneImages => "scene_images",
            Self::Voice => "voice",
            Self::Avatar => "avatar",
            Self::Subtitles => "subtitles",
            Self::ComposedVideo => "composed_video",
            Self::Publish => "publish",
            Self::Backup => "backup",
        }
    }

    /// The stage that writes the field.
    #[must_use]
    pub const fn producer(self) -> StageId {
        match self {
            Self::Topic => StageId::FetchTopic,
            Self::Narrative => StageId::GenerateNarrative,
            Self::Metadata | Self::ImagePrompts => StageId::GenerateMetadata,
            Self::SceneImages => StageId::GenerateImages,
            Self::Voice => StageId::SynthesizeVoice,
            Self::Avatar => StageId::AnimateAvatar,
            Self::Subtitles => StageId::TranscribeSubtitles,
            Self::ComposedVideo => StageId::ComposeVideo,
            Self::Publish => StageId::Upload,
            Self::Backup => StageId::Backup,
        }
    }
}

/// What a stage recorded about its execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMeta {
    /// Final status.
    pub status: StageStatus,
    /// Wall time spent, in milliseconds.
    pub elapsed_ms: u64,
    /// Name of the tier that produced the value.
    pub engine: Option<String>,
    /// 1-based tier that produced the value.
    pub tier: Option<usize>,
    /// Attempts across all tiers.
    pub attempts: u32,
}

/// Accumulating state of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    run_id: Uuid,
    created_at: DateTime<Utc>,
    topic: Topic,
    workspace_key: String,
    work_dir: PathBuf,
    narrative: Slot<Narrative>,
    metadata: Slot<VideoMetadata>,
    image_prompts: Slot<Vec<String>>,
    scene_images: Slot<Vec<MediaHandle>>,
    voice: Slot<VoiceTrack>,
    avatar: Slot<MediaHandle>,
    subtitles: Slot<MediaHandle>,
    composed_video: Slot<MediaHandle>,
    publish: Slot<PublishReceipt>,
    backup: Slot<String>,
    stages: BTreeMap<StageId, StageMeta>,
}

/// Short hex SHA-256 digest of the topic text and language.
#[must_use]
pub fn workspace_key(topic: &Topic) -> String {
    let mut hasher = Sha256::new();
    hasher.update(topic.text().as_bytes());
    hasher.update([0u8]);
    hasher.update(topic.language.code().as_bytes());
    let mut key = hex::encode(hasher.finalize());
    key.truncate(WORKSPACE_KEY_LEN);
    key
}

impl WorkItem {
    /// Creates the work item for a claimed topic, with its working directory
    /// at `output_dir/<language>/<workspace key>`.
    #[must_use]
    pub fn new(topic: Topic, output_dir: &Path) -> Self {
        let key = workspace_key(&topic);
        let work_dir = output_dir.join(topic.language.code()).join(&key);
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            topic,
            workspace_key: key,
            work_dir,
            narrative: Slot::default(),
            metadata: Slot::default(),
            image_prompts: Slot::default(),
            scene_images: Slot::default(),
            voice: Slot::default(),
            avatar: Slot::default(),
            subtitles: Slot::default(),
            composed_video: Slot::default(),
            publish: Slot::default(),
            backup: Slot::default(),
            stages: BTreeMap::new(),
        }
    }

    /// Unique run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// When the run started.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The claimed topic.
    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Deterministic key derived from topic text and language.
    #[must_use]
    pub fn workspace_key(&self) -> &str {
        &self.workspace_key
    }

    /// Directory for this run's artifacts.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// A read view for `reader`.
    #[must_use]
    pub fn inputs_for(&self, reader: StageId) -> StageInputs<'_> {
        StageInputs { item: self, reader }
    }

    /// Whether a field has been produced.
    #[must_use]
    pub fn is_set(&self, field: WorkField) -> bool {
        match field {
            WorkField::Topic => true,
            WorkField::Narrative => self.narrative.is_set(),
            WorkField::Metadata => self.metadata.is_set(),
            WorkField::ImagePrompts => self.image_prompts.is_set(),
            WorkField::SceneImages => self.scene_images.is_set(),
            WorkField::Voice => self.voice.is_set(),
            WorkField::Avatar => self.avatar.is_set(),
            WorkField::Subtitles => self.subtitles.is_set(),
            WorkField::ComposedVideo => self.composed_video.is_set(),
            WorkField::Publish => self.publish.is_set(),
            WorkField::Backup => self.backup.is_set(),
        }
    }

    /// Narrative script, if produced.
    #[must_use]
    pub fn narrative(&self) -> Option<&Narrative> {
        self.narrative.get()
    }

    /// Publishing metadata, if produced.
    #[must_use]
    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.metadata.get()
    }

    /// Image prompts, if produced.
    #[must_use]
    pub fn image_prompts(&self) -> Option<&[String]> {
        self.image_prompts.get().map(Vec::as_slice)
    }

    /// Scene images, if produced.
    #[must_use]
    pub fn scene_images(&self) -> Option<&[MediaHandle]> {
        self.scene_images.get().map(Vec::as_slice)
    }

    /// Narration, if produced.
    #[must_use]
    pub fn voice(&self) -> Option<&VoiceTrack> {
        self.voice.get()
    }

    /// Avatar clip, if produced.
    #[must_use]
    pub fn avatar(&self) -> Option<&MediaHandle> {
        self.avatar.get()
    }

    /// Subtitles, if produced.
    #[must_use]
    pub fn subtitles(&self) -> Option<&MediaHandle> {
        self.subtitles.get()
    }

    /// Composed video, if produced.
    #[must_use]
    pub fn composed_video(&self) -> Option<&MediaHandle> {
        self.composed_video.get()
    }

    /// Upload receipt, if uploaded.
    #[must_use]
    pub fn publish_receipt(&self) -> Option<&PublishReceipt> {
        self.publish.get()
    }

    /// Backup location, if backed up.
    #[must_use]
    pub fn backup_location(&self) -> Option<&str> {
        self.backup.get().map(String::as_str)
    }

    /// Sets the narrative.
    pub fn set_narrative(&mut self, value: Narrative) -> Result<(), WorkItemError> {
        self.narrative.set(WorkField::Narrative.name(), value)
    }

    /// Sets the metadata.
    pub fn set_metadata(&mut self, value: VideoMetadata) -> Result<(), WorkItemError> {
        self.metadata.set(WorkField::Metadata.name(), value)
    }

    /// Sets the image prompts.
    pub fn set_image_prompts(&mut self, value: Vec<String>) -> Result<(), WorkItemError> {
        self.image_prompts.set(WorkField::ImagePrompts.name(), value)
    }

    /// Sets the scene images.
    pub fn set_scene_images(&mut self, value: Vec<MediaHandle>) -> Result<(), WorkItemError> {
        self.scene_images.set(WorkField::SceneImages.name(), value)
    }

    /// Sets the narration.
    pub fn set_voice(&mut self, value: VoiceTrack) -> Result<(), WorkItemError> {
        self.voice.set(WorkField::Voice.name(), value)
    }

    /// Sets the avatar clip.
    pub fn set_avatar(&mut self, value: MediaHandle) -> Result<(), WorkItemError> {
        self.avatar.set(WorkField::Avatar.name(), value)
    }

    /// Sets the subtitles.
    pub fn set_subtitles(&mut self, value: MediaHandle) -> Result<(), WorkItemError> {
        self.subtitles.set(WorkField::Subtitles.name(), value)
    }

    /// Sets the composed video.
    pub fn set_composed_video(&mut self, value: MediaHandle) -> Result<(), WorkItemError> {
        self.composed_video.set(WorkField::ComposedVideo.name(), value)
    }

    /// Sets the upload receipt.
    pub fn set_publish_receipt(&mut self, value: PublishReceipt) -> Result<(), WorkItemError> {
        self.publish.set(WorkField::Publish.name(), value)
    }

    /// Sets the backup location.
    pub fn set_backup_location(&mut self, value: String) -> Result<(), WorkItemError> {
        self.backup.set(WorkField::Backup.name(), value)
    }

    /// Records a stage's execution metadata. Each stage records once.
    pub fn record_stage(&mut self, stage: StageId, meta: StageMeta) -> Result<(), WorkItemError> {
        if self.stages.contains_key(&stage) {
            return Err(WorkItemError::FieldAlreadySet {
                field: stage.as_str(),
            });
        }
        self.stages.insert(stage, meta);
        Ok(())
    }

    /// Execution metadata for `stage`.
    #[must_use]
    pub fn stage_meta(&self, stage: StageId) -> Option<&StageMeta> {
        self.stages.get(&stage)
    }

    /// All recorded stage metadata, in pipeline order.
    #[must_use]
    pub fn stages(&self) -> &BTreeMap<StageId, StageMeta> {
        &self.stages
    }

    /// Fallback tier that produced the avatar clip.
    #[must_use]
    pub fn avatar_tier(&self) -> Option<usize> {
        self.stage_meta(StageId::AnimateAvatar).and_then(|m| m.tier)
    }
}

/// Read view of a work item for one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    item: &'a WorkItem,
    reader: StageId,
}

impl<'a> StageInputs<'a> {
    /// The reading stage.
    #[must_use]
    pub fn reader(&self) -> StageId {
        self.reader
    }

    /// The underlying work item, for identity fields.
    #[must_use]
    pub fn item(&self) -> &'a WorkItem {
        self.item
    }

    fn check(&self, field: WorkField) -> Result<(), WorkItemError> {
        let producer = field.producer();
        if StageGraph::precedes(producer, self.reader) {
            Ok(())
        } else {
            Err(WorkItemError::CausalViolation {
                reader: self.reader,
                field: field.name(),
                producer,
            })
        }
    }

    fn require<T>(&self, field: WorkField, value: Option<T>) -> Result<T, WorkItemError> {
        self.check(field)?;
        value.ok_or(WorkItemError::NotYetProduced {
            reader: self.reader,
            field: field.name(),
        })
    }

    fn optional<T>(&self, field: WorkField, value: Option<T>) -> Result<Option<T>, WorkItemError> {
        self.check(field)?;
        Ok(value)
    }

    /// The topic.
    pub fn topic(&self) -> Result<&'a Topic, WorkItemError> {
        self.require(WorkField::Topic, Some(&self.item.topic))
    }

    /// The narrative.
    pub fn narrative(&self) -> Result<&'a Narrative, WorkItemError> {
        self.require(WorkField::Narrative, self.item.narrative())
    }

    /// The metadata.
    pub fn metadata(&self) -> Result<&'a VideoMetadata, WorkItemError> {
        self.require(WorkField::Metadata, self.item.metadata())
    }

    /// The image prompts.
    pub fn image_prompts(&self) -> Result<&'a [String], WorkItemError> {
        self.require(WorkField::ImagePrompts, self.item.image_prompts())
    }

    /// The scene images.
    pub fn scene_images(&self) -> Result<&'a [MediaHandle], WorkItemError> {
        self.require(WorkField::SceneImages, self.item.scene_images())
    }

    /// The narration.
    pub fn voice(&self) -> Result<&'a VoiceTrack, WorkItemError> {
        self.require(WorkField::Voice, self.item.voice())
    }

    /// The avatar clip.
    pub fn avatar(&self) -> Result<&'a MediaHandle, WorkItemError> {
        self.require(WorkField::Avatar, self.item.avatar())
    }

    /// The subtitles; absent when transcription degraded.
    pub fn subtitles(&self) -> Result<Option<&'a MediaHandle>, WorkItemError> {
        self.optional(WorkField::Subtitles, self.item.subtitles())
    }

    /// The composed video.
    pub fn composed_video(&self) -> Result<&'a MediaHandle, WorkItemError> {
        self.require(WorkField::ComposedVideo, self.item.composed_video())
    }
}
