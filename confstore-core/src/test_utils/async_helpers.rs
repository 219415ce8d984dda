//! Async test helpers
//!
//! Replication is asynchronous, so tests poll for effects instead of
//! asserting immediately after a finalize.

use std::future::Future;
use tokio::time::{sleep, timeout, Duration, Instant};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short window used to show that something did not happen
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(200);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `check` until it returns true or `duration` elapses
pub async fn wait_until<F, Fut>(duration: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + duration;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Helper to assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_until_succeeds_eventually() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let ok = wait_until(DEFAULT_TEST_TIMEOUT, || async move {
            calls.fetch_add(1, Ordering::SeqCst) >= 3
        })
        .await;
        assert!(ok);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_wait_until_gives_up() {
        assert!(!wait_until(Duration::from_millis(30), || async { false }).await);
    }

    #[tokio::test]
    async fn test_assert_completes_within() {
        let result = assert_completes_within(Duration::from_millis(100), async { 42 }).await;
        assert_eq!(result, 42);
    }
}
