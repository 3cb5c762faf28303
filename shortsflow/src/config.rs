//! Engine configuration.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A JSON file ([`Settings::from_json_file`])
//! 3. `SHORTSFLOW_*` environment variables ([`Settings::apply_env_overrides`])
//!
//! [`Settings::validate`] runs after the last layer.

use crate::core::StageId;
use crate::domain::Privacy;
use crate::errors::ConfigError;
use crate::retry::{JitterPolicy, RetrySpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SHORTSFLOW_";

/// Speech model sizes the transcriber accepts.
pub const WHISPER_MODEL_SIZES: [&str; 5] = ["tiny", "base", "small", "medium", "large-v3"];

/// Longest accepted publication delay: one year.
pub const MAX_SCHEDULE_DELAY_HOURS: u32 = 24 * 365;

/// Root settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Filesystem locations.
    pub paths: PathSettings,
    /// Default retry parameters.
    pub retry: RetrySettings,
    /// Per-stage retry overrides.
    pub stage_retry: BTreeMap<StageId, RetrySettings>,
    /// Engine names per capability.
    pub engines: EngineSettings,
    /// Transcription tiers.
    pub transcription: TranscriptionSettings,
    /// Narrative bounds.
    pub narrative: NarrativeSettings,
    /// Scene images.
    pub images: ImageSettings,
    /// Upload options.
    pub publish: PublishSettings,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Scratch directory.
    pub work_dir: PathBuf,
    /// Root of per-run artifact directories.
    pub output_dir: PathBuf,
    /// Portrait used for avatar animation.
    pub avatar_image_path: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("work"),
            output_dir: PathBuf::from("output"),
            avatar_image_path: PathBuf::from("assets/images/avatar.png"),
        }
    }
}

/// Serializable retry parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Cap on the computed delay.
    pub max_delay_ms: u64,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay; zero disables jitter.
    pub jitter_fraction: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetrySettings {
    /// Builds the runtime retry spec.
    #[must_use]
    pub fn to_spec(&self) -> RetrySpec {
        let jitter = if self.jitter_fraction > 0.0 {
            JitterPolicy::Fraction(self.jitter_fraction)
        } else {
            JitterPolicy::None
        };
        RetrySpec::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.multiplier)
            .with_jitter(jitter)
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(
                format!("{field}.max_attempts"),
                "must be at least 1",
            ));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::invalid(
                format!("{field}.multiplier"),
                "must be a finite number >= 1",
            ));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::invalid(
                format!("{field}.jitter_fraction"),
                "must be in [0, 1)",
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                format!("{field}.base_delay_ms"),
                "must not exceed max_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Engine names per capability. Lists are fallback tiers, best first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Topic queue.
    pub topics: String,
    /// Narrative generators.
    pub narrative: Vec<String>,
    /// Metadata and prompt generators.
    pub metadata: Vec<String>,
    /// Image generators.
    pub image: Vec<String>,
    /// Voice synthesizers.
    pub voice: Vec<String>,
    /// Avatar animator; its static-pan mode is the lower tier.
    pub avatar: String,
    /// Transcriber; model sizes are its tiers.
    pub transcriber: String,
    /// Video composers.
    pub composer: Vec<String>,
    /// Publisher.
    pub publisher: String,
    /// Backup store.
    pub backup: String,
    /// Notifier.
    pub notifier: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            topics: "sheets".to_string(),
            narrative: vec!["ollama".to_string()],
            metadata: vec!["ollama".to_string()],
            image: vec!["sdxl".to_string()],
            voice: vec!["edge".to_string()],
            avatar: "sadtalker".to_string(),
            transcriber: "whisper".to_string(),
            composer: vec!["ffmpeg".to_string()],
            publisher: "youtube".to_string(),
            backup: "drive".to_string(),
            notifier: "telegram".to_string(),
        }
    }
}

/// Transcription tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Preferred model size.
    pub whisper_model_size: String,
    /// Smaller sizes tried after the preferred one.
    pub fallback_sizes: Vec<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            whisper_model_size: "large-v3".to_string(),
            fallback_sizes: vec!["medium".to_string(), "base".to_string()],
        }
    }
}

impl TranscriptionSettings {
    /// Model sizes to try, preferred first, without duplicates.
    #[must_use]
    pub fn model_tiers(&self) -> Vec<String> {
        let mut tiers: Vec<String> = Vec::new();
        for size in std::iter::once(&self.whisper_model_size).chain(&self.fallback_sizes) {
            if !tiers.contains(size) {
                tiers.push(size.clone());
            }
        }
        tiers
    }
}

/// Narrative word bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeSettings {
    /// Minimum words.
    pub min_words: usize,
    /// Maximum words.
    pub max_words: usize,
}

impl Default for NarrativeSettings {
    fn default() -> Self {
        Self {
            min_words: 30,
            max_words: 200,
        }
    }
}

/// Scene image options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    /// Number of scenes to illustrate.
    pub scene_count: usize,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self { scene_count: 1 }
    }
}

/// Upload options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Upload at all; when false the upload stage is skipped.
    pub auto_upload: bool,
    /// Resumable upload chunk size.
    pub chunk_size_bytes: u64,
    /// Schedule publication this many hours after upload.
    pub schedule_delay_hours: Option<u32>,
    /// Privacy setting.
    pub privacy: Privacy,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            auto_upload: true,
            chunk_size_bytes: 10 * 1024 * 1024,
            schedule_delay_hours: None,
            privacy: Privacy::Public,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Loads settings: file (if given), then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&content)?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Applies `SHORTSFLOW_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(std::env::vars())
    }

    /// Applies `SHORTSFLOW_*` overrides from `vars`. Other keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "OUTPUT_DIR" => self.paths.output_dir = PathBuf::from(value),
                "MAX_RETRIES" => {
                    self.retry.max_attempts = value.parse().map_err(|_| {
                        ConfigError::invalid(key.as_ref(), format!("'{value}' is not a number"))
                    })?;
                }
                "TTS_ENGINE" => self.engines.voice = parse_list(value),
                "IMAGE_ENGINE" => self.engines.image = parse_list(value),
                "WHISPER_MODEL_SIZE" => self.transcription.whisper_model_size = value.to_string(),
                "AUTO_UPLOAD" => self.publish.auto_upload = parse_bool(key.as_ref(), value)?,
                "LOG" => self.logging.level = value.to_string(),
                _ => {
                    debug!(key = %key.as_ref(), "Ignoring unknown override");
                    continue;
                }
            }
            debug!(key = %key.as_ref(), "Applied override");
        }
        Ok(())
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate("retry")?;
        for (stage, retry) in &self.stage_retry {
            retry.validate(&format!("stage_retry.{stage}"))?;
        }

        if !WHISPER_MODEL_SIZES.contains(&self.transcription.whisper_model_size.as_str()) {
            return Err(ConfigError::invalid(
                "transcription.whisper_model_size",
                format!("must be one of {}", WHISPER_MODEL_SIZES.join(", ")),
            ));
        }
        if let Some(size) = self
            .transcription
            .fallback_sizes
            .iter()
            .find(|s| !WHISPER_MODEL_SIZES.contains(&s.as_str()))
        {
            return Err(ConfigError::invalid(
                "transcription.fallback_sizes",
                format!("unknown model size '{size}'"),
            ));
        }

        if self.narrative.min_words > self.narrative.max_words {
            return Err(ConfigError::invalid(
                "narrative.min_words",
                "must not exceed narrative.max_words",
            ));
        }
        if self.images.scene_count == 0 {
            return Err(ConfigError::invalid("images.scene_count", "must be at least 1"));
        }
        if self.publish.chunk_size_bytes == 0 {
            return Err(ConfigError::invalid(
                "publish.chunk_size_bytes",
                "must be greater than zero",
            ));
        }
        if self
            .publish
            .schedule_delay_hours
            .is_some_and(|hours| hours > MAX_SCHEDULE_DELAY_HOURS)
        {
            return Err(ConfigError::invalid(
                "publish.schedule_delay_hours",
                format!("must be at most {MAX_SCHEDULE_DELAY_HOURS}"),
            ));
        }

        let lists = [
            ("engines.narrative", &self.engines.narrative),
            ("engines.metadata", &self.engines.metadata),
            ("engines.image", &self.engines.image),
            ("engines.voice", &self.engines.voice),
            ("engines.composer", &self.engines.composer),
        ];
        if let Some((field, _)) = lists.iter().find(|(_, names)| names.is_empty()) {
            return Err(ConfigError::invalid(*field, "at least one engine is required"));
        }
        Ok(())
    }

    /// Retry spec for `stage`: its override if present, else the default.
    #[must_use]
    pub fn retry_for(&self, stage: StageId) -> RetrySpec {
        self.stage_retry
            .get(&stage)
            .unwrap_or(&self.retry)
            .to_spec()
    }

    /// Creates the work and output directories.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.paths.work_dir, &self.paths.output_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{value}' is not a boolean"))),
    }
}
