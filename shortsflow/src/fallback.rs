//! Ordered implementation tiers.
//!
//! A [`FallbackChain`] holds one or more [`Tier`]s, best first. Each tier is
//! retried under its own [`RetrySpec`]; only when its retries are exhausted
//! (or it fails non-retryably) does the chain move to the next tier.
//! Cancellation stops the chain immediately.

use crate::cancellation::CancellationToken;
use crate::errors::PipelineError;
use crate::retry::{run_with_retry_notify, RetrySpec};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Shared, type-erased tier implementation.
pub type TierFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, PipelineError>> + Send + Sync>;

/// One ranked implementation option.
pub struct Tier<I, O> {
    name: String,
    retry: RetrySpec,
    call: TierFn<I, O>,
}

impl<I, O> Clone for Tier<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            retry: self.retry.clone(),
            call: Arc::clone(&self.call),
        }
    }
}

impl<I, O> std::fmt::Debug for Tier<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<I, O> Tier<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a tier with the default retry spec.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, PipelineError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            retry: RetrySpec::default(),
            call: Arc::new(move |input| Box::pin(f(input))),
        }
    }
}

impl<I, O> Tier<I, O> {
    /// Replaces the retry spec.
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySpec) -> Self {
        self.retry = retry;
        self
    }

    /// Tier name, usually the engine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retry spec applied within this tier.
    #[must_use]
    pub fn retry(&self) -> &RetrySpec {
        &self.retry
    }

    /// Returns a handle to the implementation.
    #[must_use]
    pub fn callable(&self) -> TierFn<I, O> {
        Arc::clone(&self.call)
    }

    /// Invokes the implementation once.
    pub fn call(&self, input: I) -> BoxFuture<'static, Result<O, PipelineError>> {
        (self.call)(input)
    }
}

/// Non-empty ordered list of tiers.
pub struct FallbackChain<I, O> {
    tiers: Vec<Tier<I, O>>,
}

impl<I, O> Clone for FallbackChain<I, O> {
    fn clone(&self) -> Self {
        Self {
            tiers: self.tiers.clone(),
        }
    }
}

impl<I, O> std::fmt::Debug for FallbackChain<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tiers.iter().map(Tier::name)).finish()
    }
}

impl<I, O> FallbackChain<I, O> {
    /// Creates a chain whose best tier is `first`.
    #[must_use]
    pub fn new(first: Tier<I, O>) -> Self {
        Self { tiers: vec![first] }
    }

    /// Appends a lower tier.
    #[must_use]
    pub fn then(mut self, tier: Tier<I, O>) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Applies `retry` to every tier.
    #[must_use]
    pub fn with_retry(mut self, retry: &RetrySpec) -> Self {
        for tier in &mut self.tiers {
            tier.retry = retry.clone();
        }
        self
    }

    /// Tiers, best first.
    #[must_use]
    pub fn tiers(&self) -> &[Tier<I, O>] {
        &self.tiers
    }

    /// Tier names, best first.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tiers.iter().map(Tier::name).collect()
    }

    /// Number of tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    /// Always false; a chain has at least one tier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

/// Terminal failure of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFailure {
    /// 1-based tier number.
    pub tier: usize,
    /// Tier name.
    pub tier_name: String,
    /// Attempts spent in the tier.
    pub attempts: u32,
    /// The failure that ended the tier.
    pub error: PipelineError,
}

/// A value produced by some tier.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackSuccess<T> {
    /// The produced value.
    pub value: T,
    /// 1-based tier that produced it.
    pub tier: usize,
    /// Name of that tier.
    pub tier_name: String,
    /// Attempt within that tier that succeeded.
    pub attempts: u32,
    /// Attempts across all tiers tried.
    pub total_attempts: u32,
    /// Failures of the tiers tried before, best first.
    pub trail: Vec<TierFailure>,
}

/// Every tier failed, or the chain was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct FallbackFailure {
    /// Aggregated, non-retryable error.
    pub error: PipelineError,
    /// Per-tier failures, best first.
    pub trail: Vec<TierFailure>,
    /// Attempts across all tiers tried.
    pub total_attempts: u32,
}

impl FallbackFailure {
    fn new(trail: Vec<TierFailure>, total_attempts: u32) -> Self {
        let error = match trail.last() {
            Some(last) if last.error.is_cancellation() => last.error.clone(),
            Some(last) => {
                let summary = trail
                    .iter()
                    .map(|f| format!("tier {} '{}': {}", f.tier, f.tier_name, f.error.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                PipelineError {
                    retryable: false,
                    message: format!("all {} tier(s) failed: {summary}", trail.len()),
                    ..last.error.clone()
                }
            }
            None => PipelineError::cancelled("cancelled before any tier ran"),
        };
        Self {
            error,
            trail,
            total_attempts,
        }
    }

    /// Returns true if the chain stopped because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancellation()
    }
}

/// Progress notifications from [`run_chain`].
#[derive(Debug)]
pub enum ChainEvent<'a> {
    /// A failed attempt will be retried within the same tier.
    RetryScheduled {
        /// 1-based tier number.
        tier: usize,
        /// Tier name.
        tier_name: &'a str,
        /// Attempt that failed.
        attempt: u32,
        /// Backoff before the next attempt.
        delay: Duration,
        /// The failure.
        error: &'a PipelineError,
    },
    /// A tier is exhausted and the next one takes over.
    Fallback {
        /// Exhausted tier number.
        from_tier: usize,
        /// Exhausted tier name.
        from_name: &'a str,
        /// Next tier name.
        to_name: &'a str,
        /// Failure that exhausted the tier.
        error: &'a PipelineError,
    },
}

/// Runs the chain, invoking each tier directly with a clone of `input`.
pub async fn run_with_fallback<I, O>(
    chain: &FallbackChain<I, O>,
    input: I,
    cancel: &CancellationToken,
) -> Result<FallbackSuccess<O>, FallbackFailure>
where
    I: Clone,
{
    run_chain(chain, cancel, |_| {}, |tier, _| tier.call(input.clone())).await
}

/// Runs the chain with a custom per-attempt operation.
///
/// `op(tier, attempt)` is called once per attempt; callers wrap the tier call
/// with per-attempt concerns such as acquiring a resource lease.
pub async fn run_chain<I, O, F, Fut, N>(
    chain: &FallbackChain<I, O>,
    cancel: &CancellationToken,
    mut on_event: N,
    mut op: F,
) -> Result<FallbackSuccess<O>, FallbackFailure>
where
    F: FnMut(&Tier<I, O>, u32) -> Fut,
    Fut: Future<Output = Result<O, PipelineError>>,
    N: FnMut(ChainEvent<'_>),
{
    let mut trail: Vec<TierFailure> = Vec::new();
    let mut total_attempts = 0;
    let tiers = chain.tiers();

    for (index, tier) in tiers.iter().enumerate() {
        let number = index + 1;
        let result = run_with_retry_notify(
            tier.retry(),
            cancel,
            |attempt, delay, error| {
                on_event(ChainEvent::RetryScheduled {
                    tier: number,
                    tier_name: tier.name(),
                    attempt,
                    delay,
                    error,
                });
            },
            |attempt| op(tier, attempt),
        )
        .await;

        match result {
            Ok(done) => {
                total_attempts += done.attempts;
                return Ok(FallbackSuccess {
                    value: done.value,
                    tier: number,
                    tier_name: tier.name().to_string(),
                    attempts: done.attempts,
                    total_attempts,
                    trail,
                });
            }
            Err(exhausted) => {
                total_attempts += exhausted.attempts;
                let cancelled = exhausted.is_cancelled();
                trail.push(TierFailure {
                    tier: number,
                    tier_name: tier.name().to_string(),
                    attempts: exhausted.attempts,
                    error: exhausted.last,
                });
                if cancelled {
                    break;
                }
                if let (Some(next), Some(failed)) = (tiers.get(index + 1), trail.last()) {
                    warn!(
                        tier = number,
                        from = %tier.name(),
                        to = %next.name(),
                        error = %failed.error,
                        "Tier exhausted, falling back"
                    );
                    on_event(ChainEvent::Fallback {
                        from_tier: number,
                        from_name: tier.name(),
                        to_name: next.name(),
                        error: &failed.error,
                    });
                }
            }
        }
    }

    Err(FallbackFailure::new(trail, total_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::retry::JitterPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetrySpec {
        RetrySpec::new()
            .with_base_delay(Duration::from_millis(10))
            .with_jitter(JitterPolicy::None)
    }

    fn counting_tier(
        name: &str,
        calls: Arc<AtomicU32>,
        outcome: Result<&'static str, PipelineError>,
    ) -> Tier<u32, &'static str> {
        Tier::new(name, move |_input: u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            let outcome = outcome.clone();
            async move { outcome }
        })
        .with_retry(fast_retry())
    }

    fn oom() -> PipelineError {
        PipelineError::transient(ErrorKind::AvatarAnimation, "out of memory")
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_tier_takes_over_after_exhaustion() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let chain = FallbackChain::new(counting_tier("sadtalker", first.clone(), Err(oom())))
            .then(counting_tier("static_pan", second.clone(), Ok("pan.mp4")));

        let done = run_with_fallback(&chain, 7, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(done.value, "pan.mp4");
        assert_eq!(done.tier, 2);
        assert_eq!(done.tier_name, "static_pan");
        assert_eq!(done.attempts, 1);
        assert_eq!(done.total_attempts, 4);
        assert_eq!(done.trail.len(), 1);
        assert_eq!(done.trail[0].tier, 1);
        assert_eq!(done.trail[0].attempts, 3);
        assert_eq!(done.trail[0].error, oom());
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_tier_success_skips_rest() {
        let second = Arc::new(AtomicU32::new(0));
        let chain = FallbackChain::new(counting_tier("edge", Arc::default(), Ok("a.wav")))
            .then(counting_tier("gtts", second.clone(), Ok("b.wav")));

        let done = run_with_fallback(&chain, 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.tier, 1);
        assert!(done.trail.is_empty());
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_moves_to_next_tier_without_retrying() {
        let first = Arc::new(AtomicU32::new(0));
        let bad = PipelineError::permanent(ErrorKind::VoiceGeneration, "voice not found");
        let chain = FallbackChain::new(counting_tier("edge", first.clone(), Err(bad)))
            .then(counting_tier("gtts", Arc::default(), Ok("b.wav")));

        let done = run_with_fallback(&chain, 0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.tier, 2);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(done.total_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_tiers_failing_aggregates() {
        let chain = FallbackChain::new(counting_tier("sadtalker", Arc::default(), Err(oom())))
            .then(counting_tier("static_pan", Arc::default(), Err(oom())));

        let failure = run_with_fallback(&chain, 0, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.trail.len(), 2);
        assert_eq!(failure.total_attempts, 6);
        assert!(!failure.error.retryable);
        assert_eq!(failure.error.kind, ErrorKind::AvatarAnimation);
        assert!(failure.error.message.contains("tier 1 'sadtalker'"));
        assert!(failure.error.message.contains("tier 2 'static_pan'"));
        assert!(!failure.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_chain() {
        let second = Arc::new(AtomicU32::new(0));
        let chain = FallbackChain::new(counting_tier("sadtalker", Arc::default(), Err(oom())))
            .then(counting_tier("static_pan", second.clone(), Ok("pan.mp4")));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel("shutdown");
        });

        let failure = run_with_fallback(&chain, 0, &token).await.unwrap_err();
        assert!(failure.is_cancelled());
        assert_eq!(failure.trail.len(), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_chain_reports_events() {
        let chain = FallbackChain::new(counting_tier("large-v3", Arc::default(), Err(oom())))
            .then(counting_tier("medium", Arc::default(), Ok("subs.srt")));
        let mut retries = 0;
        let mut fallbacks = Vec::new();

        let done = run_chain(
            &chain,
            &CancellationToken::new(),
            |event| match event {
                ChainEvent::RetryScheduled { .. } => retries += 1,
                ChainEvent::Fallback { from_name, to_name, .. } => {
                    fallbacks.push(format!("{from_name}->{to_name}"));
                }
            },
            |tier, _attempt| tier.call(1),
        )
        .await
        .unwrap();

        assert_eq!(done.tier, 2);
        assert_eq!(retries, 2);
        assert_eq!(fallbacks, vec!["large-v3->medium".to_string()]);
    }

    #[test]
    fn test_chain_names_and_shared_retry() {
        let spec = RetrySpec::once();
        let chain = FallbackChain::new(counting_tier("a", Arc::default(), Ok("x")))
            .then(counting_tier("b", Arc::default(), Ok("y")))
            .with_retry(&spec);
        assert_eq!(chain.names(), vec!["a", "b"]);
        assert_eq!(chain.len(), 2);
        assert!(chain.tiers().iter().all(|t| t.retry().max_attempts == 1));
    }
}
