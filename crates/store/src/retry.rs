//! Conflict retry policy.
//!
//! Adapters detect races through the backend (a uniqueness violation, an
//! update that touched no row, a stale revision token) and signal them as
//! [`StoreError::Conflict`]. The helpers here re-run the whole operation on
//! those signals, up to a fixed bound.
//!
//! - [`with_conflict_retry`] re-enters only on conflicts.
//! - [`with_retry`] also re-enters on transient failures (connection errors,
//!   timeouts); the document store uses it for its write paths.
//!
//! Any other error propagates immediately. When the budget runs out the
//! caller gets [`StoreError::RetriesExhausted`] wrapping the last failure.
//!
//! # Delay
//!
//! Retries are immediate by default. A non-zero
//! [`base_delay`](RetryPolicy::base_delay) sleeps `base_delay` plus up to
//! `base_delay` of random jitter between attempts.

use std::{future::Future, time::Duration};

use fail::fail_point;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{StoreError, StoreResult};

/// Default retry bound for increment-style races.
pub const DEFAULT_INCREMENT_RETRIES: u32 = 3;

/// Default retry bound for upsert fallbacks and revision-token conflicts.
pub const DEFAULT_WRITE_RETRIES: u32 = 9;

/// How many times, and how fast, an operation is re-run.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use kvbridge_store::RetryPolicy;
///
/// let policy = RetryPolicy::builder().max_retries(5).base_delay(Duration::from_millis(2)).build();
/// assert_eq!(policy.max_attempts(), 6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    #[serde(default = "default_max_retries")]
    #[builder(default = DEFAULT_INCREMENT_RETRIES)]
    pub max_retries: u32,

    /// Pause between attempts before jitter.
    #[serde(with = "humantime_serde", default)]
    #[builder(default = Duration::ZERO)]
    pub base_delay: Duration,
}

fn default_max_retries() -> u32 {
    DEFAULT_INCREMENT_RETRIES
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: DEFAULT_INCREMENT_RETRIES, base_delay: Duration::ZERO }
    }
}

impl RetryPolicy {
    /// Policy for increment-style races.
    #[must_use]
    pub fn increments() -> Self {
        Self::default()
    }

    /// Policy for upsert fallbacks and revision-token conflicts.
    #[must_use]
    pub fn writes() -> Self {
        Self { max_retries: DEFAULT_WRITE_RETRIES, base_delay: Duration::ZERO }
    }

    /// Policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO }
    }

    /// Total attempts including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    fn delay(&self) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let range = self.base_delay.as_millis() as u64;
        self.base_delay + Duration::from_millis(rand::rng().random_range(0..=range))
    }
}

/// Which failures [`run`] re-enters on.
#[derive(Debug, Clone, Copy)]
enum Retryable {
    Conflicts,
    ConflictsAndTransient,
}

impl Retryable {
    fn matches(self, err: &StoreError) -> bool {
        match self {
            Self::Conflicts => err.is_conflict(),
            Self::ConflictsAndTransient => err.is_conflict() || err.is_transient(),
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-conflict error, or
/// `policy` is exhausted.
///
/// `operation` must re-run the full detect-then-recover sequence on every
/// call; it is never resumed mid-way.
///
/// # Errors
///
/// Returns the first non-conflict error unchanged, or
/// [`StoreError::RetriesExhausted`] once every attempt conflicted.
pub async fn with_conflict_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &'static str,
    operation: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    run(policy, operation_name, Retryable::Conflicts, operation).await
}

/// Like [`with_conflict_retry`], but transient failures are retried too.
///
/// # Errors
///
/// Returns the first error that is neither a conflict nor transient, or
/// [`StoreError::RetriesExhausted`] once the budget is spent.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &'static str,
    operation: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    run(policy, operation_name, Retryable::ConflictsAndTransient, operation).await
}

async fn run<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &'static str,
    retryable: Retryable,
    mut operation: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) if retryable.matches(&err) => err,
            Err(err) => return Err(err),
        };

        if attempt >= policy.max_attempts() {
            tracing::warn!(
                operation = operation_name,
                attempts = attempt,
                error = %err,
                "retry budget exhausted",
            );
            return Err(StoreError::retries_exhausted(operation_name, attempt, err));
        }

        let delay = policy.delay();
        tracing::debug!(
            operation = operation_name,
            attempt,
            max_attempts = policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying",
        );
        fail_point!("retry-before-sleep");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_conflict_retry(&RetryPolicy::default(), "op", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Ok::<_, StoreError>(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn conflict_then_success() {
        let calls = AtomicU32::new(0);
        let result = with_conflict_retry(&RetryPolicy::default(), "op", || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move { if attempt < 2 { Err(StoreError::conflict("raced")) } else { Ok(attempt) } }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_conflict() {
        let policy = RetryPolicy::builder().max_retries(3).build();
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_conflict_retry(&policy, "increment", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(StoreError::conflict("no row updated")) }
        })
        .await;

        match result {
            Err(StoreError::RetriesExhausted { operation, attempts, last }) => {
                assert_eq!(operation, "increment");
                assert_eq!(attempts, 4);
                assert!(last.is_conflict());
            },
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn type_mismatch_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_conflict_retry(&RetryPolicy::writes(), "op", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(StoreError::type_mismatch("not an integer")) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::TypeMismatch { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn conflict_retry_ignores_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_conflict_retry(&RetryPolicy::writes(), "op", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(StoreError::connection("refused")) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Connection { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn with_retry_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::writes(), "store", || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                match attempt {
                    0 => Err(StoreError::timeout("slow")),
                    1 => Err(StoreError::connection("reset")),
                    2 => Err(StoreError::conflict("stale revision")),
                    _ => Ok("done"),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn with_retry_stops_on_backend_rejection() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_retry(&RetryPolicy::writes(), "store", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(StoreError::backend_status(400, "bad_request")) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Backend { status: Some(400), .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn zero_retries_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let result: StoreResult<()> = with_conflict_retry(&RetryPolicy::none(), "op", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(StoreError::conflict("raced")) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::RetriesExhausted { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_base_plus_bounded_jitter() {
        let policy =
            RetryPolicy::builder().max_retries(1).base_delay(Duration::from_millis(10)).build();
        for _ in 0..50 {
            let delay = policy.delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(20));
        }

        let start = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);
        let _ = with_conflict_retry(&policy, "op", || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move { if attempt == 0 { Err(StoreError::conflict("x")) } else { Ok(()) } }
        })
        .await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn defaults_match_reference_bounds() {
        assert_eq!(RetryPolicy::increments().max_attempts(), 4);
        assert_eq!(RetryPolicy::writes().max_attempts(), 10);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[test]
    fn deserializes_humantime_delay() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_retries": 2, "base_delay": "15ms"}"#).unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_millis(15));

        let defaulted: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(defaulted, RetryPolicy::default());

        assert!(serde_json::from_str::<RetryPolicy>(r#"{"retries": 1}"#).is_err());
    }
}
