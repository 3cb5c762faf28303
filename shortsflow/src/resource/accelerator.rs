//! Accelerator device handle.

use serde::{Deserialize, Serialize};

/// Snapshot of the accelerator's identity and memory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    /// Device name.
    pub name: String,
    /// Total device memory.
    pub total_memory_bytes: u64,
    /// Free device memory.
    pub free_memory_bytes: u64,
}

/// The device owned by the lease manager.
///
/// `reclaim` is invoked after every lease ends and must not block for long.
#[cfg_attr(test, mockall::automock)]
pub trait Accelerator: Send + Sync {
    /// Returns device information.
    fn info(&self) -> AcceleratorInfo;

    /// Frees cached allocations left by the previous holder.
    fn reclaim(&self);
}

/// Stand-in used when no device is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccelerator;

impl Accelerator for NoAccelerator {
    fn info(&self) -> AcceleratorInfo {
        AcceleratorInfo {
            name: "none".to_string(),
            ..AcceleratorInfo::default()
        }
    }

    fn reclaim(&self) {}
}
