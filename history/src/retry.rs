//! Retry utility with exponential backoff

use crate::error::HistoryResult;
use std::time::Duration;
use tracing::warn;

/// Retry a document store call while it fails with a transient error.
///
/// Returns `Ok` on first success, the first non-transient `Err`, or the last
/// `Err` once `max_attempts` are used up. Delays: `initial_delay`,
/// `2 * initial_delay`, ... capped at 5s.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    initial_delay: Duration,
    mut f: F,
) -> HistoryResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = HistoryResult<T>>,
{
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
