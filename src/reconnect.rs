use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Repeat a read until the backend is reachable.
///
/// Only [`Error::Connectivity`] is retried, after `delay`; any other outcome
/// is returned as is. Dropping the future cancels the pending retry. Use it
/// for reads such as the people listing, never for writes.
///
/// # Errors
///
/// Returns the first error that is not a connectivity failure.
pub async fn fetch_with_reconnect<T, F, Fut>(delay: Duration, mut fetch: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt: u32 = 1;
    loop {
        match fetch().await {
            Err(e) if e.is_connectivity() => {
                tracing::warn!(attempt, retry_in_secs = delay.as_secs(), "backend unreachable, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
