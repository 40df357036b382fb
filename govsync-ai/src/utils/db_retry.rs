//! Database Retry Logic
//!
//! Exponential backoff for transient storage failures (lock contention, pool
//! timeouts, I/O errors). Retries are bounded by `database.max_lock_wait_ms`.

use std::future::Future;
use std::time::{Duration, Instant};
use govsync_common::Result;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry a database operation while it fails with a transient error
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If transient ([`govsync_common::Error::is_transient`]):
///    a. If time elapsed < max_wait_ms: log WARN, backoff, retry
///    b. Otherwise: log ERROR, return the last error unchanged
/// 4. Any other error is returned immediately
///
/// The exhausted error is returned as-is, so callers can still tell
/// "gave up on contention" apart from other storage failures.
///
/// **Backoff:** 10ms initial, doubling, capped at 1000ms.
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    let elapsed_ms = start_time.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Database operation succeeded after significant retry period (>2s)"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Database operation succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(err);
                }

                let delay = Duration::from_millis(backoff_ms).min(max_duration - elapsed);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis(),
                    backoff_ms = delay.as_millis(),
                    error = %err,
                    "Storage temporarily unavailable, will retry after backoff"
                );

                tokio::time::sleep(delay).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
