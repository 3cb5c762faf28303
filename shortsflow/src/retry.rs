//! Bounded retries with exponential backoff and jitter.
//!
//! Retrying is explicit higher-order composition: [`run_with_retry`] takes an
//! operation closure that receives the 1-based attempt number and produces a
//! future. Nothing held by the operation survives between attempts, so a
//! resource lease acquired inside the closure is never held across a backoff
//! sleep.

use crate::cancellation::CancellationToken;
use crate::errors::PipelineError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Predicate deciding whether a failure may be retried.
pub type RetryPredicate = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

/// Jitter added on top of the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// No jitter.
    None,
    /// Uniform random extra in `[0, delay * fraction)`.
    Fraction(f64),
}

impl Default for JitterPolicy {
    fn default() -> Self {
        Self::Fraction(0.1)
    }
}

/// Retry parameters for one tier of one stage.
#[derive(Clone)]
pub struct RetrySpec {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the computed delay (before jitter).
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Jitter policy.
    pub jitter: JitterPolicy,
    retryable: RetryPredicate,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: JitterPolicy::default(),
            retryable: Arc::new(default_retryable),
        }
    }
}

fn default_retryable(err: &PipelineError) -> bool {
    err.retryable && !err.is_cancellation()
}

impl std::fmt::Debug for RetrySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrySpec")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetrySpec {
    /// Creates a spec with the default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A spec that never retries.
    #[must_use]
    pub fn once() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter policy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the retryable predicate.
    ///
    /// Cancellation is never retried regardless of the predicate.
    #[must_use]
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PipelineError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Whether `err` may be retried under this spec.
    #[must_use]
    pub fn is_retryable(&self, err: &PipelineError) -> bool {
        !err.is_cancellation() && (self.retryable)(err)
    }

    /// Backoff before the retry that follows failed attempt `attempt` (1-based),
    /// without jitter: `min(base * multiplier^(attempt-1), max)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff including jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        match self.jitter {
            JitterPolicy::None => delay,
            JitterPolicy::Fraction(fraction) => {
                let upper = delay.as_secs_f64() * fraction;
                if upper > 0.0 && upper.is_finite() {
                    let extra = rand::thread_rng().gen_range(0.0..upper);
                    delay + Duration::try_from_secs_f64(extra).unwrap_or(Duration::ZERO)
                } else {
                    delay
                }
            }
        }
    }

    /// Decides what to do after attempt `attempt` failed with `err`.
    #[must_use]
    pub fn decide(&self, attempt: u32, err: &PipelineError) -> RetryDecision {
        if !self.is_retryable(err) {
            RetryDecision::NotRetryable
        } else if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.delay_for(attempt))
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Attempts are exhausted.
    GiveUp,
    /// The error is not retryable.
    NotRetryable,
}

/// A successful value and the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    /// The produced value.
    pub value: T,
    /// 1-based attempt number that succeeded.
    pub attempts: u32,
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryExhausted {
    /// Attempts made.
    pub attempts: u32,
    /// The failure that ended the loop.
    pub last: PipelineError,
    /// Earlier failures, oldest first.
    pub earlier: Vec<PipelineError>,
}

impl RetryExhausted {
    /// Returns true if the loop ended because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.last.is_cancellation()
    }
}

/// Runs `op` under `spec`, aborting backoff sleeps on cancellation.
pub async fn run_with_retry<T, F, Fut>(
    spec: &RetrySpec,
    cancel: &CancellationToken,
    op: F,
) -> Result<Attempted<T>, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    run_with_retry_notify(spec, cancel, |_, _, _| {}, op).await
}

/// Like [`run_with_retry`], calling `on_retry(attempt, delay, error)` before
/// each backoff sleep.
pub async fn run_with_retry_notify<T, F, Fut, N>(
    spec: &RetrySpec,
    cancel: &CancellationToken,
    mut on_retry: N,
    mut op: F,
) -> Result<Attempted<T>, RetryExhausted>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
    N: FnMut(u32, Duration, &PipelineError),
{
    let mut earlier = Vec::new();
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryExhausted {
                attempts: attempt,
                last: cancelled_error(cancel),
                earlier,
            });
        }
        attempt += 1;

        let err = match op(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(err) => err,
        };

        match spec.decide(attempt, &err) {
            RetryDecision::Retry(delay) => {
                debug!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying after error"
                );
                on_retry(attempt, delay, &err);
                earlier.push(err);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last: cancelled_error(cancel),
                            earlier,
                        });
                    }
                }
            }
            RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last: err,
                    earlier,
                });
            }
        }
    }
}

fn cancelled_error(cancel: &CancellationToken) -> PipelineError {
    PipelineError::cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> PipelineError {
        PipelineError::transient(ErrorKind::VoiceGeneration, "busy")
    }

    fn no_jitter() -> RetrySpec {
        RetrySpec::new().with_jitter(JitterPolicy::None)
    }

    #[test]
    fn test_defaults() {
        let spec = RetrySpec::default();
        assert_eq!(spec.max_attempts, 3);
        assert_eq!(spec.base_delay, Duration::from_secs(2));
        assert_eq!(spec.max_delay, Duration::from_secs(60));
        assert!((spec.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(spec.jitter, JitterPolicy::Fraction(0.1));
    }

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let spec = no_jitter();
        assert_eq!(spec.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(spec.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(spec.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(spec.backoff_delay(10), Duration::from_secs(60));
        assert_eq!(spec.backoff_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_base_delay() {
        let spec = no_jitter().with_base_delay(Duration::ZERO);
        assert_eq!(spec.backoff_delay(u32::MAX), Duration::ZERO);
        assert_eq!(spec.delay_for(3), Duration::ZERO);
    }

    #[test]
    fn test_jitter_within_fraction() {
        let spec = RetrySpec::new().with_jitter(JitterPolicy::Fraction(0.5));
        for _ in 0..50 {
            let delay = spec.delay_for(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay < Duration::from_secs(3));
        }
    }

    #[test]
    fn test_decide() {
        let spec = no_jitter();
        assert_eq!(
            spec.decide(1, &transient()),
            RetryDecision::Retry(Duration::from_secs(2))
        );
        assert_eq!(spec.decide(3, &transient()), RetryDecision::GiveUp);
        let permanent = PipelineError::permanent(ErrorKind::Upload, "401");
        assert_eq!(spec.decide(1, &permanent), RetryDecision::NotRetryable);
    }

    #[test]
    fn test_custom_predicate_never_retries_cancellation() {
        let spec = no_jitter().with_retryable(|_| true);
        assert!(spec.is_retryable(&PipelineError::permanent(ErrorKind::Upload, "x")));
        assert!(!spec.is_retryable(&PipelineError::cancelled("stop")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let start = Instant::now();

        let result = run_with_retry(&no_jitter(), &token, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(transient())
                } else {
                    Ok("voice.wav")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "voice.wav");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 2s + 4s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();

        let err = run_with_retry(&no_jitter(), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(PipelineError::permanent(ErrorKind::Upload, "auth")) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
        assert!(err.earlier.is_empty());
        assert_eq!(err.last.message, "auth");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_failure() {
        let token = CancellationToken::new();
        let err = run_with_retry(&no_jitter(), &token, |attempt| async move {
            Err::<(), _>(PipelineError::transient(
                ErrorKind::AvatarAnimation,
                format!("oom #{attempt}"),
            ))
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.last.message, "oom #3");
        assert_eq!(err.earlier.len(), 2);
        assert!(!err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_aborts_sleep() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel("shutdown");
        });
        let start = Instant::now();

        let err = run_with_retry(&no_jitter(), &token, |_| async {
            Err::<(), _>(transient())
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last.message, "shutdown");
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let token = CancellationToken::new();
        token.cancel("early");
        let calls = AtomicU32::new(0);

        let err = run_with_retry(&no_jitter(), &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, PipelineError>(()) }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(err.attempts, 0);
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_reports_each_retry() {
        let token = CancellationToken::new();
        let mut seen = Vec::new();

        let _ = run_with_retry_notify(
            &no_jitter(),
            &token,
            |attempt, delay, _| seen.push((attempt, delay)),
            |_| async { Err::<(), _>(transient()) },
        )
        .await;

        assert_eq!(
            seen,
            vec![(1, Duration::from_secs(2)), (2, Duration::from_secs(4))]
        );
    }
}
