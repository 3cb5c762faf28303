//! Exclusive access to the single accelerator.
//!
//! The [`ResourceLeaseManager`] serializes every stage that declares a
//! [`ResourceClaim`]. Waiters are served in FIFO order, a [`ResourceLease`]
//! releases on drop, and the manager tracks which owner's heavyweight state is
//! currently resident so the next claimant can evict it.

mod accelerator;
mod lease;

pub use accelerator::{Accelerator, AcceleratorInfo, NoAccelerator};
#[cfg(test)]
pub use accelerator::MockAccelerator;
pub use lease::{
    CleanupHook, EvictHook, LeaseStats, ResourceClaim, ResourceLease, ResourceLeaseManager,
};

/// Owner key for language-model state.
pub const OWNER_LLM: &str = "llm";
/// Owner key for image diffusion state.
pub const OWNER_DIFFUSION: &str = "diffusion";
/// Owner key for avatar animation state.
pub const OWNER_AVATAR: &str = "avatar";
/// Owner key for speech recognition state.
pub const OWNER_WHISPER: &str = "whisper";
