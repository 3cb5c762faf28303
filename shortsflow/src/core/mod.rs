//! Core vocabulary shared by every layer of the engine.
//!
//! This module contains:
//! - The fixed set of pipeline stages
//! - Stage and run status enums
//! - The per-run state machine

mod stage;
mod status;

pub use stage::StageId;
pub use status::{RunState, RunStatus, StageStatus};
