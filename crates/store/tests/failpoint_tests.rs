#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the retry loop.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p kvbridge-store --features failpoints --test failpoint_tests
//! ```

#![cfg(feature = "failpoints")]

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use kvbridge_store::{RetryPolicy, StoreError, with_conflict_retry};

async fn conflict_once(calls: Arc<AtomicU32>) -> Result<u32, StoreError> {
    with_conflict_retry(&RetryPolicy::default(), "increment", || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst);
        async move { if attempt == 0 { Err(StoreError::conflict("raced")) } else { Ok(attempt) } }
    })
    .await
}

#[tokio::test]
async fn retry_fail_point_fires_between_attempts() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("retry-before-sleep", "panic").expect("failed to configure fail point");

    let calls = Arc::new(AtomicU32::new(0));
    let handle = tokio::spawn(conflict_once(Arc::clone(&calls)));
    let joined = handle.await;

    assert!(joined.expect_err("retry path should hit the fail point").is_panic());
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second attempt must not run");

    scenario.teardown();
}

#[tokio::test]
async fn retry_fail_point_untouched_on_first_success() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("retry-before-sleep", "panic").expect("failed to configure fail point");

    let result = with_conflict_retry(&RetryPolicy::default(), "load", || async { Ok::<_, StoreError>(1) })
        .await;
    assert_eq!(result.expect("no retry needed"), 1);

    scenario.teardown();
}

#[tokio::test]
async fn retry_without_fail_point_recovers() {
    let scenario = fail::FailScenario::setup();

    let calls = Arc::new(AtomicU32::new(0));
    let attempt = conflict_once(Arc::clone(&calls)).await.expect("second attempt succeeds");
    assert_eq!(attempt, 1);

    scenario.teardown();
}
