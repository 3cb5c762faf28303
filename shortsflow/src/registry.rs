//! Capability registry.
//!
//! Engines are registered by name per collaborator interface, then resolved
//! once at startup against [`EngineSettings`] into a fixed [`Capabilities`]
//! bundle. The orchestrator only ever sees the bundle.

use crate::config::EngineSettings;
use crate::errors::ConfigError;
use crate::ports::{
    AvatarAnimator, BackupStore, ImageGenerator, MetadataGenerator, NarrativeGenerator,
    Notifier, Publisher, TopicSource, Transcriber, VideoComposer, VoiceSynthesizer,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// An engine together with the name it was registered under.
pub struct Named<T: ?Sized> {
    name: String,
    engine: Arc<T>,
}

impl<T: ?Sized> Clone for Named<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Named<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl<T: ?Sized> Named<T> {
    /// Wraps an engine.
    pub fn new(name: impl Into<String>, engine: Arc<T>) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }

    /// Registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the engine.
    #[must_use]
    pub fn engine(&self) -> Arc<T> {
        Arc::clone(&self.engine)
    }
}

/// Resolved collaborators. Lists are fallback tiers, best first.
#[derive(Clone, Debug)]
pub struct Capabilities {
    /// Topic queue.
    pub topics: Named<dyn TopicSource>,
    /// Narrative generators.
    pub narrative: Vec<Named<dyn NarrativeGenerator>>,
    /// Metadata and prompt generators.
    pub metadata: Vec<Named<dyn MetadataGenerator>>,
    /// Image generators.
    pub image: Vec<Named<dyn ImageGenerator>>,
    /// Voice synthesizers.
    pub voice: Vec<Named<dyn VoiceSynthesizer>>,
    /// Avatar animator.
    pub avatar: Named<dyn AvatarAnimator>,
    /// Transcriber.
    pub transcriber: Named<dyn Transcriber>,
    /// Video composers.
    pub composer: Vec<Named<dyn VideoComposer>>,
    /// Publisher.
    pub publisher: Named<dyn Publisher>,
    /// Backup store.
    pub backup: Named<dyn BackupStore>,
    /// Notifier.
    pub notifier: Named<dyn Notifier>,
}

struct Slots<T: ?Sized> {
    capability: &'static str,
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Slots<T> {
    fn new(capability: &'static str) -> Self {
        Self {
            capability,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, name: String, engine: Arc<T>) {
        self.entries.write().insert(name, engine);
    }

    fn resolve(&self, name: &str) -> Result<Named<T>, ConfigError> {
        self.entries
            .read()
            .get(name)
            .map(|engine| Named::new(name, Arc::clone(engine)))
            .ok_or_else(|| ConfigError::UnknownEngine {
                capability: self.capability,
                name: name.to_string(),
            })
    }

    fn resolve_all(&self, names: &[String]) -> Result<Vec<Named<T>>, ConfigError> {
        if names.is_empty() {
            return Err(ConfigError::MissingCapability {
                capability: self.capability,
            });
        }
        names.iter().map(|name| self.resolve(name)).collect()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Name-keyed engines per collaborator interface.
pub struct CapabilityRegistry {
    topics: Slots<dyn TopicSource>,
    narrative: Slots<dyn NarrativeGenerator>,
    metadata: Slots<dyn MetadataGenerator>,
    image: Slots<dyn ImageGenerator>,
    voice: Slots<dyn VoiceSynthesizer>,
    avatar: Slots<dyn AvatarAnimator>,
    transcriber: Slots<dyn Transcriber>,
    composer: Slots<dyn VideoComposer>,
    publisher: Slots<dyn Publisher>,
    backup: Slots<dyn BackupStore>,
    notifier: Slots<dyn Notifier>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("topics", &self.topics.names())
            .field("narrative", &self.narrative.names())
            .field("metadata", &self.metadata.names())
            .field("image", &self.image.names())
            .field("voice", &self.voice.names())
            .field("avatar", &self.avatar.names())
            .field("transcriber", &self.transcriber.names())
            .field("composer", &self.composer.names())
            .field("publisher", &self.publisher.names())
            .field("backup", &self.backup.names())
            .field("notifier", &self.notifier.names())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: Slots::new("topic source"),
            narrative: Slots::new("narrative"),
            metadata: Slots::new("metadata"),
            image: Slots::new("image"),
            voice: Slots::new("voice"),
            avatar: Slots::new("avatar"),
            transcriber: Slots::new("transcriber"),
            composer: Slots::new("composer"),
            publisher: Slots::new("publisher"),
            backup: Slots::new("backup"),
            notifier: Slots::new("notifier"),
        }
    }

    /// Registers a topic source.
    pub fn register_topics(&self, name: impl Into<String>, engine: Arc<dyn TopicSource>) {
        self.topics.insert(name.into(), engine);
    }

    /// Registers a narrative generator.
    pub fn register_narrative(&self, name: impl Into<String>, engine: Arc<dyn NarrativeGenerator>) {
        self.narrative.insert(name.into(), engine);
    }

    /// Registers a metadata generator.
    pub fn register_metadata(&self, name: impl Into<String>, engine: Arc<dyn MetadataGenerator>) {
        self.metadata.insert(name.into(), engine);
    }

    /// Registers an image generator.
    pub fn register_image(&self, name: impl Into<String>, engine: Arc<dyn ImageGenerator>) {
        self.image.insert(name.into(), engine);
    }

    /// Registers a voice synthesizer.
    pub fn register_voice(&self, name: impl Into<String>, engine: Arc<dyn VoiceSynthesizer>) {
        self.voice.insert(name.into(), engine);
    }

    /// Registers an avatar animator.
    pub fn register_avatar(&self, name: impl Into<String>, engine: Arc<dyn AvatarAnimator>) {
        self.avatar.insert(name.into(), engine);
    }

    /// Registers a transcriber.
    pub fn register_transcriber(&self, name: impl Into<String>, engine: Arc<dyn Transcriber>) {
        self.transcriber.insert(name.into(), engine);
    }

    /// Registers a video composer.
    pub fn register_composer(&self, name: impl Into<String>, engine: Arc<dyn VideoComposer>) {
        self.composer.insert(name.into(), engine);
    }

    /// Registers a publisher.
    pub fn register_publisher(&self, name: impl Into<String>, engine: Arc<dyn Publisher>) {
        self.publisher.insert(name.into(), engine);
    }

    /// Registers a backup store.
    pub fn register_backup(&self, name: impl Into<String>, engine: Arc<dyn BackupStore>) {
        self.backup.insert(name.into(), engine);
    }

    /// Registers a notifier.
    pub fn register_notifier(&self, name: impl Into<String>, engine: Arc<dyn Notifier>) {
        self.notifier.insert(name.into(), engine);
    }

    /// Registered voice engine names, sorted.
    #[must_use]
    pub fn voice_engines(&self) -> Vec<String> {
        self.voice.names()
    }

    /// Registered image engine names, sorted.
    #[must_use]
    pub fn image_engines(&self) -> Vec<String> {
        self.image.names()
    }

    /// Resolves every configured engine name.
    ///
    /// Fails on the first name with no registration, so a typo in settings
    /// surfaces at startup instead of mid-run.
    pub fn resolve(&self, engines: &EngineSettings) -> Result<Capabilities, ConfigError> {
        let capabilities = Capabilities {
            topics: self.topics.resolve(&engines.topics)?,
            narrative: self.narrative.resolve_all(&engines.narrative)?,
            metadata: self.metadata.resolve_all(&engines.metadata)?,
            image: self.image.resolve_all(&engines.image)?,
            voice: self.voice.resolve_all(&engines.voice)?,
            avatar: self.avatar.resolve(&engines.avatar)?,
            transcriber: self.transcriber.resolve(&engines.transcriber)?,
            composer: self.composer.resolve_all(&engines.composer)?,
            publisher: self.publisher.resolve(&engines.publisher)?,
            backup: self.backup.resolve(&engines.backup)?,
            notifier: self.notifier.resolve(&engines.notifier)?,
        };
        info!(
            narrative = ?capabilities.narrative,
            voice = ?capabilities.voice,
            image = ?capabilities.image,
            avatar = %capabilities.avatar.name(),
            transcriber = %capabilities.transcriber.name(),
            "Resolved capabilities"
        );
        Ok(capabilities)
    }
}
