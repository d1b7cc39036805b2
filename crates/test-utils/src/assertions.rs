//! Polling assertions for async tests.

use std::time::Duration;

use tokio::time::{Instant, sleep};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` every 10 ms until it holds or `timeout` expires.
///
/// Returns whether the condition held. The condition is checked once more
/// after the deadline.
///
/// ```no_run
/// use std::time::Duration;
/// use ironvault_test_utils::assert_eventually;
///
/// # async fn example(store: &std::sync::Mutex<Vec<u8>>) {
/// let ok = assert_eventually(Duration::from_secs(1), || !store.lock().unwrap().is_empty()).await;
/// assert!(ok, "consumer should have applied the message");
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    assert_eventually_every(timeout, DEFAULT_POLL_INTERVAL, condition).await
}

/// Like [`assert_eventually`] with an explicit poll interval.
pub async fn assert_eventually_every<F>(timeout: Duration, poll_interval: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(poll_interval).await;
    }
    condition()
}
