//! Retry policy behavior under paused time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use feedcast::feed::{FeedError, RetryPolicy};

fn policy(max_attempts: u32) -> RetryPolicy<FeedError> {
    RetryPolicy::new(max_attempts, Duration::from_secs(3), 2, FeedError::is_transient)
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    let calls = AtomicU32::new(0);
    let started = tokio::time::Instant::now();

    let result = policy(10)
        .run(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(FeedError::Transient("timeout".to_owned()))
            } else {
                Ok("doc")
            }
        })
        .await;

    assert_eq!(result.expect("should succeed"), "doc");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // 3s after the first failure, 6s after the second.
    assert_eq!(started.elapsed(), Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_not_retried() {
    let calls = AtomicU32::new(0);
    let result: Result<(), FeedError> = policy(10)
        .run(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FeedError::Fetch("HTTP 404".to_owned()))
        })
        .await;

    assert_eq!(result, Err(FeedError::Fetch("HTTP 404".to_owned())));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn attempts_are_bounded_and_last_error_returned() {
    let calls = AtomicU32::new(0);
    let result: Result<(), FeedError> = policy(4)
        .run(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(FeedError::Transient(format!("attempt {n}")))
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(result, Err(FeedError::Transient("attempt 3".to_owned())));
}
