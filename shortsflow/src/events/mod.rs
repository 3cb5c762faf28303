//! Lifecycle events emitted by the orchestrator, executor and lease manager.
//!
//! Every event is a dotted name plus an optional JSON payload. Sinks decide
//! what to do with them: log, collect for assertions, or drop.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run began.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// The run state machine moved.
pub const PIPELINE_STATE: &str = "pipeline.state";
/// A run reached a terminal state.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A stage began executing.
pub const STAGE_STARTED: &str = "stage.started";
/// A failed attempt will be retried after a delay.
pub const STAGE_RETRY_SCHEDULED: &str = "stage.retry_scheduled";
/// A tier was exhausted and the next tier takes over.
pub const STAGE_FALLBACK: &str = "stage.fallback";
/// A stage produced its value.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A non-essential stage failed and the run continues degraded.
pub const STAGE_DEGRADED: &str = "stage.degraded";
/// An essential stage failed.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage was disabled by configuration.
pub const STAGE_SKIPPED: &str = "stage.skipped";
/// Resident accelerator state was unloaded for a new owner.
pub const RESOURCE_EVICTED: &str = "resource.evicted";
