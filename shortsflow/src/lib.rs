//! # Shortsflow
//!
//! A pipeline orchestration engine that turns a queued topic into a published
//! short video.
//!
//! Shortsflow drives a fixed graph of stages (narrative, metadata, images,
//! voice, avatar, subtitles, composition, upload, backup, notification) and
//! provides:
//!
//! - **Retry with backoff**: bounded exponential retries that tell retryable
//!   failures from permanent ones
//! - **Fallback tiers**: ordered implementation options per stage
//! - **Exclusive accelerator leases**: FIFO access to the single GPU-class
//!   device, released on every exit path
//! - **Graceful degradation**: non-essential stages fail without failing the run
//! - **Cancellation**: a run-scoped token honoured at every suspension point
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shortsflow::prelude::*;
//!
//! let settings = Settings::load(Some(Path::new("shortsflow.json")))?;
//! init_tracing(&settings.logging);
//!
//! let registry = CapabilityRegistry::new();
//! registry.register_topics("sheets", Arc::new(SheetsQueue::new()));
//! // ... one registration per configured engine
//!
//! let orchestrator = Orchestrator::from_registry(&registry, settings)?;
//! let outcomes = orchestrator.drain(&CancellationToken::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod domain;
pub mod errors;
pub mod events;
pub mod executor;
pub mod fallback;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod registry;
pub mod resource;
pub mod retry;
pub mod testing;
pub mod work_item;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{LoggingConfig, RetrySettings, Settings};
    pub use crate::core::{RunState, RunStatus, StageId, StageStatus};
    pub use crate::domain::{
        Language, MediaHandle, Narrative, PublishReceipt, Topic, VideoMetadata, VoiceTrack,
    };
    pub use crate::errors::{ConfigError, ErrorKind, PipelineError, ShortsflowError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{LeaseHook, StageExecutor, StageResult, StageSpec};
    pub use crate::fallback::{run_with_fallback, FallbackChain, Tier};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{DrainError, Orchestrator, PipelineOutcome, StageGraph};
    pub use crate::ports::{
        AvatarAnimator, BackupStore, ImageGenerator, MetadataGenerator, NarrativeGenerator,
        Notifier, Publisher, TopicSource, Transcriber, VideoComposer, VoiceSynthesizer,
    };
    pub use crate::registry::{Capabilities, CapabilityRegistry};
    pub use crate::resource::{Accelerator, ResourceClaim, ResourceLeaseManager};
    pub use crate::retry::{run_with_retry, JitterPolicy, RetrySpec};
    pub use crate::work_item::WorkItem;
}
