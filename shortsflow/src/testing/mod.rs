//! Testing utilities for shortsflow pipelines.
//!
//! This module provides:
//! - Scripted fake collaborators with call counters
//! - A [`FakeEngines`] bundle registered under the default engine names
//! - Fast retry settings for end-to-end tests

mod fakes;

pub use fakes::{
    CallScript, FakeAvatar, FakeBackup, FakeComposer, FakeImages, FakeMetadata, FakeNarrative,
    FakeNotifier, FakePublisher, FakeTopicSource, FakeTranscriber, FakeVoice,
};

use crate::config::{EngineSettings, RetrySettings, Settings};
use crate::registry::{Capabilities, CapabilityRegistry};
use std::path::Path;
use std::sync::Arc;

/// One fake per collaborator interface.
#[derive(Debug, Clone, Default)]
pub struct FakeEngines {
    /// Topic queue.
    pub topics: Arc<FakeTopicSource>,
    /// Narrative generator.
    pub narrative: Arc<FakeNarrative>,
    /// Metadata generator.
    pub metadata: Arc<FakeMetadata>,
    /// Image generator.
    pub images: Arc<FakeImages>,
    /// Voice synthesizer.
    pub voice: Arc<FakeVoice>,
    /// Avatar animator.
    pub avatar: Arc<FakeAvatar>,
    /// Transcriber.
    pub transcriber: Arc<FakeTranscriber>,
    /// Composer.
    pub composer: Arc<FakeComposer>,
    /// Publisher.
    pub publisher: Arc<FakePublisher>,
    /// Backup store.
    pub backup: Arc<FakeBackup>,
    /// Notifier.
    pub notifier: Arc<FakeNotifier>,
}

impl FakeEngines {
    /// Creates fresh fakes that always succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every fake under its default engine name.
    #[must_use]
    pub fn registry(&self) -> CapabilityRegistry {
        let names = EngineSettings::default();
        let registry = CapabilityRegistry::new();
        registry.register_topics(names.topics, self.topics.clone());
        for name in names.narrative {
            registry.register_narrative(name, self.narrative.clone());
        }
        for name in names.metadata {
            registry.register_metadata(name, self.metadata.clone());
        }
        for name in names.image {
            registry.register_image(name, self.images.clone());
        }
        for name in names.voice {
            registry.register_voice(name, self.voice.clone());
        }
        registry.register_avatar(names.avatar, self.avatar.clone());
        registry.register_transcriber(names.transcriber, self.transcriber.clone());
        for name in names.composer {
            registry.register_composer(name, self.composer.clone());
        }
        registry.register_publisher(names.publisher, self.publisher.clone());
        registry.register_backup(names.backup, self.backup.clone());
        registry.register_notifier(names.notifier, self.notifier.clone());
        registry
    }

    /// Capabilities resolved against the default engine names.
    ///
    /// # Panics
    ///
    /// Never; every default name is registered by [`Self::registry`].
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn capabilities(&self) -> Capabilities {
        self.registry()
            .resolve(&EngineSettings::default())
            .expect("default engine names are all registered")
    }
}

/// Settings with millisecond backoff and no jitter, writing under `output_dir`.
#[must_use]
pub fn fast_settings(output_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.paths.output_dir = output_dir.to_path_buf();
    settings.paths.work_dir = output_dir.join("work");
    settings.retry = RetrySettings {
        base_delay_ms: 10,
        max_delay_ms: 100,
        jitter_fraction: 0.0,
        ..RetrySettings::default()
    };
    settings
}
