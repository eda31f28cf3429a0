//! Bounded retry for transient blob failures.
//!
//! Only [`BlobError::Transient`] is retried; everything else surfaces
//! immediately. Backoff math comes from `ward-core`; this module adds the
//! tokio sleep between attempts.

use std::future::Future;

use tracing::warn;

use crate::error::BlobError;
use ward_core::retry::{calculate_backoff_delay, RetryConfig};

/// Run `operation` up to `config.max_attempts` times, sleeping with
/// exponential backoff between transient failures.
pub async fn with_retry<T, F, Fut>(
    op_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, BlobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BlobError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                let delay = calculate_backoff_delay(attempt, config.base_delay_ms, config.max_delay_ms);
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %err,
                    "transient storage failure, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
