//! Stage execution.
//!
//! [`StageExecutor::execute`] runs one stage's [`FallbackChain`], retrying
//! within each tier, acquiring the accelerator lease fresh for every attempt
//! when the stage declares a [`ResourceClaim`], and racing each collaborator
//! call against the run's cancellation token. The outcome is an immutable
//! [`StageResult`].

use crate::cancellation::CancellationToken;
use crate::core::{StageId, StageStatus};
use crate::errors::PipelineError;
use crate::events::{
    EventSink, NoOpEventSink, STAGE_COMPLETED, STAGE_DEGRADED, STAGE_FAILED, STAGE_FALLBACK,
    STAGE_RETRY_SCHEDULED, STAGE_SKIPPED, STAGE_STARTED,
};
use crate::fallback::{run_chain, ChainEvent, FallbackChain, TierFailure};
use crate::resource::{ResourceClaim, ResourceLeaseManager};
use crate::retry::RetrySpec;
use crate::work_item::StageMeta;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Hook attached to every lease a stage takes.
pub type LeaseHook = Arc<dyn Fn() + Send + Sync>;

/// Declaration of one stage: identity, resource need and tiers.
pub struct StageSpec<I, O> {
    id: StageId,
    resource: Option<ResourceClaim>,
    resident: Option<LeaseHook>,
    cleanup: Option<LeaseHook>,
    chain: FallbackChain<I, O>,
}

impl<I, O> std::fmt::Debug for StageSpec<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSpec")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("keeps_resident", &self.resident.is_some())
            .field("has_cleanup", &self.cleanup.is_some())
            .field("chain", &self.chain)
            .finish()
    }
}

impl<I, O> StageSpec<I, O> {
    /// Creates a spec that needs no exclusive resource.
    #[must_use]
    pub fn new(id: StageId, chain: FallbackChain<I, O>) -> Self {
        Self {
            id,
            resource: None,
            resident: None,
            cleanup: None,
            chain,
        }
    }

    /// Declares that every attempt needs the accelerator.
    #[must_use]
    pub fn with_resource(mut self, claim: ResourceClaim) -> Self {
        self.resource = Some(claim);
        self
    }

    /// Leaves the stage's state resident after each attempt; `unload` runs
    /// when another owner claims the accelerator. Ignored without a claim.
    #[must_use]
    pub fn keep_resident(mut self, unload: LeaseHook) -> Self {
        self.resident = Some(unload);
        self
    }

    /// Runs `cleanup` every time an attempt's lease ends. Ignored without a
    /// claim.
    #[must_use]
    pub fn on_release(mut self, cleanup: LeaseHook) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Applies one retry spec to every tier.
    #[must_use]
    pub fn with_retry(mut self, retry: &RetrySpec) -> Self {
        self.chain = self.chain.with_retry(retry);
        self
    }

    /// Stage identity.
    #[must_use]
    pub fn id(&self) -> StageId {
        self.id
    }

    /// Declared resource need.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceClaim> {
        self.resource.as_ref()
    }

    /// The tiers.
    #[must_use]
    pub fn chain(&self) -> &FallbackChain<I, O> {
        &self.chain
    }
}

/// Outcome of one stage execution.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult<T = ()> {
    stage: StageId,
    status: StageStatus,
    #[serde(skip)]
    value: Option<T>,
    error: Option<PipelineError>,
    tier: Option<usize>,
    tier_name: Option<String>,
    attempts: u32,
    total_attempts: u32,
    trail: Vec<TierFailure>,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    elapsed: Duration,
}

impl<T> StageResult<T> {
    /// A result for a stage that configuration disabled.
    #[must_use]
    pub fn skipped(stage: StageId) -> Self {
        let now = Utc::now();
        Self {
            stage,
            status: StageStatus::Skipped,
            value: None,
            error: None,
            tier: None,
            tier_name: None,
            attempts: 0,
            total_attempts: 0,
            trail: Vec::new(),
            started_at: now,
            ended_at: now,
            elapsed: Duration::ZERO,
        }
    }

    /// A result for a stage that failed before any collaborator call, e.g.
    /// because its inputs could not be read.
    #[must_use]
    pub fn failed(stage: StageId, error: PipelineError) -> Self {
        let error = error.with_stage(stage);
        let status = if error.is_cancellation() || stage.is_essential() {
            StageStatus::FatalFailure
        } else {
            StageStatus::RecoverableFailure
        };
        Self {
            status,
            error: Some(error),
            ..Self::skipped(stage)
        }
    }

    /// The stage.
    #[must_use]
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Final status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.status
    }

    /// Produced value, on success.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Failure detail, on failure.
    #[must_use]
    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// 1-based tier that produced the value.
    #[must_use]
    pub fn tier(&self) -> Option<usize> {
        self.tier
    }

    /// Name of the producing tier.
    #[must_use]
    pub fn tier_name(&self) -> Option<&str> {
        self.tier_name.as_deref()
    }

    /// Attempt within the producing tier that succeeded, or attempts of the
    /// last tier tried on failure.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts across every tier tried.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    /// Failures of the tiers tried before the producing (or last) tier.
    #[must_use]
    pub fn trail(&self) -> &[TierFailure] {
        &self.trail
    }

    /// Wall-clock start.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock end.
    #[must_use]
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    /// Time spent, including backoff and lease waits.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Metadata recorded on the work item.
    #[must_use]
    pub fn meta(&self) -> StageMeta {
        StageMeta {
            status: self.status,
            elapsed_ms: u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX),
            engine: self.tier_name.clone(),
            tier: self.tier,
            attempts: self.total_attempts,
        }
    }

    /// Splits off the value, keeping the rest as a value-less record.
    #[must_use]
    pub fn into_parts(self) -> (Option<T>, StageResult) {
        let Self {
            stage,
            status,
            value,
            error,
            tier,
            tier_name,
            attempts,
            total_attempts,
            trail,
            started_at,
            ended_at,
            elapsed,
        } = self;
        (
            value,
            StageResult {
                stage,
                status,
                value: None,
                error,
                tier,
                tier_name,
                attempts,
                total_attempts,
                trail,
                started_at,
                ended_at,
                elapsed,
            },
        )
    }
}

/// Runs stages under retry, fallback and the accelerator lease.
#[derive(Clone)]
pub struct StageExecutor {
    leases: ResourceLeaseManager,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("leases", &self.leases)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor sharing `leases`.
    #[must_use]
    pub fn new(leases: ResourceLeaseManager) -> Self {
        Self {
            leases,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The lease manager.
    #[must_use]
    pub fn leases(&self) -> &ResourceLeaseManager {
        &self.leases
    }

    /// Records a stage that configuration disabled.
    pub fn skip<T>(&self, stage: StageId, reason: &str) -> StageResult<T> {
        info!(stage = %stage, reason, "Stage skipped");
        self.sink.try_emit(
            STAGE_SKIPPED,
            Some(json!({ "stage": stage.as_str(), "reason": reason })),
        );
        StageResult::skipped(stage)
    }

    /// Executes one stage.
    ///
    /// Never returns an error: failures are classified into the result's
    /// status. Cancellation is always fatal; other exhausted failures are
    /// fatal only for essential stages.
    pub async fn execute<I, O>(
        &self,
        spec: &StageSpec<I, O>,
        input: I,
        cancel: &CancellationToken,
    ) -> StageResult<O>
    where
        I: Clone,
    {
        let stage = spec.id;
        let started_at = Utc::now();
        let clock = Instant::now();
        let sink = &self.sink;

        info!(stage = %stage, tiers = ?spec.chain.names(), "Stage started");
        sink.try_emit(
            STAGE_STARTED,
            Some(json!({
                "stage": stage.as_str(),
                "tiers": spec.chain.names(),
                "resource": spec.resource.as_ref().map(|c| c.owner.clone()),
            })),
        );

        let outcome = run_chain(
            &spec.chain,
            cancel,
            |event| match event {
                ChainEvent::RetryScheduled {
                    tier,
                    tier_name,
                    attempt,
                    delay,
                    error,
                } => sink.try_emit(
                    STAGE_RETRY_SCHEDULED,
                    Some(json!({
                        "stage": stage.as_str(),
                        "tier": tier,
                        "tier_name": tier_name,
                        "attempt": attempt,
                        "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "error": error.to_json(),
                    })),
                ),
                ChainEvent::Fallback {
                    from_tier,
                    from_name,
                    to_name,
                    error,
                } => sink.try_emit(
                    STAGE_FALLBACK,
                    Some(json!({
                        "stage": stage.as_str(),
                        "from_tier": from_tier,
                        "from": from_name,
                        "to": to_name,
                        "error": error.to_json(),
                    })),
                ),
            },
            |tier, attempt| {
                let call = tier.callable();
                let input = input.clone();
                let claim = spec.resource.as_ref();
                let resident = spec.resident.clone();
                let cleanup = spec.cleanup.clone();
                let leases = &self.leases;
                async move {
                    let _lease = match claim {
                        Some(claim) => {
                            let mut lease = leases.acquire(claim, cancel).await?;
                            if let Some(unload) = resident {
                                lease.keep_resident(move || unload());
                            }
                            if let Some(cleanup) = cleanup {
                                lease.register_cleanup(move || cleanup());
                            }
                            Some(lease)
                        }
                        None => None,
                    };
                    debug!(stage = %stage, attempt, "Invoking collaborator");
                    let result = tokio::select! {
                        biased;
                        () = cancel.cancelled() => Err(PipelineError::cancelled(
                            cancel.reason().unwrap_or_else(|| "cancelled".to_string()),
                        )),
                        result = call(input) => result,
                    };
                    result.map_err(|e| e.with_stage(stage))
                }
            },
        )
        .await;

        let ended_at = Utc::now();
        let elapsed = clock.elapsed();

        match outcome {
            Ok(done) => {
                info!(
                    stage = %stage,
                    tier = done.tier,
                    engine = %done.tier_name,
                    attempts = done.total_attempts,
                    "Stage completed"
                );
                sink.try_emit(
                    STAGE_COMPLETED,
                    Some(json!({
                        "stage": stage.as_str(),
                        "tier": done.tier,
                        "tier_name": done.tier_name,
                        "attempts": done.attempts,
                        "total_attempts": done.total_attempts,
                    })),
                );
                StageResult {
                    stage,
                    status: StageStatus::Success,
                    value: Some(done.value),
                    error: None,
                    tier: Some(done.tier),
                    tier_name: Some(done.tier_name),
                    attempts: done.attempts,
                    total_attempts: done.total_attempts,
                    trail: done.trail,
                    started_at,
                    ended_at,
                    elapsed,
                }
            }
            Err(failure) => {
                let error = failure.error.with_stage(stage);
                let fatal = error.is_cancellation() || stage.is_essential();
                let status = if fatal {
                    StageStatus::FatalFailure
                } else {
                    StageStatus::RecoverableFailure
                };
                warn!(stage = %stage, status = %status, error = %error, "Stage failed");
                sink.try_emit(
                    if fatal { STAGE_FAILED } else { STAGE_DEGRADED },
                    Some(json!({
                        "stage": stage.as_str(),
                        "error": error.to_json(),
                        "total_attempts": failure.total_attempts,
                    })),
                );
                let attempts = failure.trail.last().map_or(0, |f| f.attempts);
                StageResult {
                    stage,
                    status,
                    value: None,
                    error: Some(error),
                    tier: None,
                    tier_name: None,
                    attempts,
                    total_attempts: failure.total_attempts,
                    trail: failure.trail,
                    started_at,
                    ended_at,
                    elapsed,
                }
            }
        }
    }
}
