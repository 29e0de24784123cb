//! Bounded retry with no backoff.

use std::fmt::Display;
use std::future::Future;

/// Run `operation`, retrying immediately up to `max_retries` times.
///
/// `max_retries == 0` runs it exactly once. The last error is returned
/// unchanged once retries are exhausted.
pub async fn with_retry<T, E, F, Fut>(label: &str, max_retries: u32, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_retries,
                    error = %error,
                    "attempt failed, retrying"
                );
            }
            Err(error) => return Err(error),
        }
    }
}
