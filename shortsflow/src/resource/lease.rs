//! Lease manager and scoped leases.

use super::{Accelerator, AcceleratorInfo};
use crate::cancellation::CancellationToken;
use crate::errors::{ErrorKind, PipelineError};
use crate::events::{EventSink, NoOpEventSink, RESOURCE_EVICTED};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Hook run exactly once when a lease ends.
pub type CleanupHook = Box<dyn FnOnce() + Send>;

/// Hook that unloads an owner's resident state.
pub type EvictHook = Box<dyn FnOnce() + Send>;

/// What a stage asks for when it needs the accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceClaim {
    /// Owner key of the heavyweight state the stage loads.
    pub owner: String,
    /// Evict a different owner's resident state before running.
    pub evict_previous: bool,
}

impl ResourceClaim {
    /// Creates a claim that evicts any other resident owner.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            evict_previous: true,
        }
    }

    /// Sets whether the previous owner is evicted.
    #[must_use]
    pub fn with_evict_previous(mut self, evict: bool) -> Self {
        self.evict_previous = evict;
        self
    }
}

struct Resident {
    owner: String,
    evict: Vec<EvictHook>,
}

struct Shared {
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    evictions: AtomicUsize,
    resident: Mutex<Option<Resident>>,
    accelerator: Option<Arc<dyn Accelerator>>,
    sink: RwLock<Arc<dyn EventSink>>,
}

impl Shared {
    fn update_peak(&self, current: usize) {
        let mut peak = self.peak.load(Ordering::Relaxed);
        while current > peak {
            match self
                .peak
                .compare_exchange_weak(peak, current, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
    }

    fn evict(&self, resident: Resident, by: &str) {
        info!(evicted = %resident.owner, by = %by, "Evicting resident accelerator state");
        for hook in resident.evict.into_iter().rev() {
            run_hook(hook, "evict");
        }
        self.evictions.fetch_add(1, Ordering::Relaxed);
        let sink = self.sink.read().clone();
        sink.try_emit(
            RESOURCE_EVICTED,
            Some(serde_json::json!({ "evicted": resident.owner, "by": by })),
        );
    }
}

/// Counters describing lease activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaseStats {
    /// Leases currently held.
    pub outstanding: usize,
    /// Highest number of simultaneously held leases.
    pub peak: usize,
    /// Total successful acquisitions.
    pub acquisitions: usize,
    /// Total releases.
    pub releases: usize,
    /// Resident states evicted.
    pub evictions: usize,
}

/// Serializes access to the single accelerator.
///
/// Backed by a one-permit fair semaphore, so waiters are granted the lease in
/// arrival order. Clones share the same lease.
#[derive(Clone)]
pub struct ResourceLeaseManager {
    semaphore: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl Default for ResourceLeaseManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceLeaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLeaseManager")
            .field("stats", &self.stats())
            .field("resident_owner", &self.resident_owner())
            .finish_non_exhaustive()
    }
}

impl ResourceLeaseManager {
    /// Creates a manager with no device handle.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, Arc::new(NoOpEventSink))
    }

    /// Creates a manager owning `accelerator` and logs what the device reports.
    #[must_use]
    pub fn with_accelerator(accelerator: Arc<dyn Accelerator>) -> Self {
        let AcceleratorInfo {
            name,
            total_memory_bytes,
            free_memory_bytes,
        } = accelerator.info();
        info!(
            device = %name,
            total_mb = total_memory_bytes / (1024 * 1024),
            free_mb = free_memory_bytes / (1024 * 1024),
            "Accelerator attached"
        );
        Self::build(Some(accelerator), Arc::new(NoOpEventSink))
    }

    /// Emits eviction events to `sink`.
    #[must_use]
    pub fn with_event_sink(self, sink: Arc<dyn EventSink>) -> Self {
        self.set_event_sink(sink);
        self
    }

    /// Replaces the eviction event sink. Clones share the change.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.shared.sink.write() = sink;
    }

    fn build(accelerator: Option<Arc<dyn Accelerator>>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            shared: Arc::new(Shared {
                outstanding: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                acquisitions: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                evictions: AtomicUsize::new(0),
                resident: Mutex::new(None),
                accelerator,
                sink: RwLock::new(sink),
            }),
        }
    }

    /// Returns the device handle, if any.
    #[must_use]
    pub fn accelerator(&self) -> Option<&Arc<dyn Accelerator>> {
        self.shared.accelerator.as_ref()
    }

    /// Waits for the lease.
    ///
    /// Returns a cancellation error if `cancel` fires first; the waiter then
    /// leaves the queue without ever holding the lease.
    pub async fn acquire(
        &self,
        claim: &ResourceClaim,
        cancel: &CancellationToken,
    ) -> Result<ResourceLease, PipelineError> {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(PipelineError::cancelled(
                    cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                ));
            }
            permit = self.semaphore.clone().acquire_owned() => permit.map_err(|_| {
                PipelineError::permanent(ErrorKind::Configuration, "resource lease manager closed")
            })?,
        };
        Ok(self.grant(permit, claim))
    }

    /// Takes the lease if it is free right now.
    #[must_use]
    pub fn try_acquire(&self, claim: &ResourceClaim) -> Option<ResourceLease> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.grant(permit, claim))
    }

    fn grant(&self, permit: OwnedSemaphorePermit, claim: &ResourceClaim) -> ResourceLease {
        let current = self.shared.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.update_peak(current);
        self.shared.acquisitions.fetch_add(1, Ordering::Relaxed);
        debug!(owner = %claim.owner, "Accelerator lease acquired");

        if claim.evict_previous {
            let previous = {
                let mut resident = self.shared.resident.lock();
                if resident.as_ref().is_some_and(|r| r.owner != claim.owner) {
                    resident.take()
                } else {
                    None
                }
            };
            if let Some(previous) = previous {
                self.shared.evict(previous, &claim.owner);
            }
        }

        ResourceLease {
            permit: Some(permit),
            shared: Arc::clone(&self.shared),
            owner: claim.owner.clone(),
            cleanups: Vec::new(),
            keep: None,
        }
    }

    /// Owner key of the state currently resident on the device.
    #[must_use]
    pub fn resident_owner(&self) -> Option<String> {
        self.shared.resident.lock().as_ref().map(|r| r.owner.clone())
    }

    /// Evicts the resident state, if any.
    pub fn evict_resident(&self) {
        let previous = self.shared.resident.lock().take();
        if let Some(previous) = previous {
            self.shared.evict(previous, "manager");
        }
    }

    /// Returns lease counters.
    #[must_use]
    pub fn stats(&self) -> LeaseStats {
        LeaseStats {
            outstanding: self.shared.outstanding.load(Ordering::SeqCst),
            peak: self.shared.peak.load(Ordering::Relaxed),
            acquisitions: self.shared.acquisitions.load(Ordering::Relaxed),
            releases: self.shared.releases.load(Ordering::Relaxed),
            evictions: self.shared.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive ownership of the accelerator for one stage attempt.
///
/// Released exactly once: explicitly through [`release`](Self::release) or
/// on drop, whichever comes first.
pub struct ResourceLease {
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared>,
    owner: String,
    cleanups: Vec<CleanupHook>,
    keep: Option<EvictHook>,
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("owner", &self.owner)
            .field("released", &self.is_released())
            .field("cleanups", &self.cleanups.len())
            .finish_non_exhaustive()
    }
}

impl ResourceLease {
    /// Owner key this lease was claimed for.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns true once the lease has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.permit.is_none()
    }

    /// Registers a hook to run when the lease ends. Hooks run in LIFO order.
    pub fn register_cleanup<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_released() {
            run_hook(Box::new(hook), "cleanup");
        } else {
            self.cleanups.push(Box::new(hook));
        }
    }

    /// Leaves this owner's state resident after release; `evict` unloads it
    /// when a different owner claims the device.
    ///
    /// Hooks kept by successive leases of the same owner accumulate and each
    /// runs once, newest first, when that owner is evicted.
    pub fn keep_resident<F>(&mut self, evict: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.keep = Some(Box::new(evict));
    }

    /// Releases the lease. Later calls do nothing.
    pub fn release(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };

        while let Some(hook) = self.cleanups.pop() {
            run_hook(hook, "cleanup");
        }

        if let Some(evict) = self.keep.take() {
            let replaced = {
                let mut resident = self.shared.resident.lock();
                match resident.as_mut().filter(|r| r.owner == self.owner) {
                    Some(current) => {
                        current.evict.push(evict);
                        None
                    }
                    None => resident.replace(Resident {
                        owner: self.owner.clone(),
                        evict: vec![evict],
                    }),
                }
            };
            if let Some(replaced) = replaced {
                self.shared.evict(replaced, &self.owner);
            }
        }

        if let Some(accelerator) = &self.shared.accelerator {
            let accelerator = Arc::clone(accelerator);
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                accelerator.reclaim();
            })) {
                warn!("Accelerator reclaim panicked: {:?}", e);
            }
        }

        self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.shared.releases.fetch_add(1, Ordering::Relaxed);
        debug!(owner = %self.owner, "Accelerator lease released");
        drop(permit);
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_hook(hook: Box<dyn FnOnce() + Send>, what: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(hook)) {
        warn!(hook = what, "Lease hook panicked: {:?}", e);
    }
}
