//! Retry/backoff wrapper shared by both LLM call sites (plan, completion)
//! and the extractor's per-chunk call, so the policy lives in one place
//! instead of three.
//!
//! Policy: 30s timeout per attempt, up to 2 retries, quadratic backoff of
//! `300 * (n+1)^2` ms between attempts, for transient failures only
//! (408, 429, 5xx). All retries carry the same request — callers pass an
//! `FnMut` precisely so the same arguments are reused.

use std::future::Future;
use std::time::Duration;

use crate::error::RagError;
use crate::providers::ProviderCallError;

const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 2;

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(300 * u64::from(attempt + 1) * u64::from(attempt + 1))
}

pub async fn with_retry<F, Fut, T>(operation: &str, mut call: F) -> Result<T, RagError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderCallError>>,
{
    let mut attempt = 0;
    loop {
        let outcome = tokio::time::timeout(TIMEOUT, call()).await;
        match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                if attempt >= MAX_RETRIES || !err.is_transient() {
                    tracing::warn!(operation, attempt, error = %err, "provider call failed, not retrying");
                    return Err(RagError::ProviderError(err.message));
                }
                tracing::warn!(operation, attempt, error = %err, "provider call failed, retrying");
            }
            Err(_elapsed) => {
                if attempt >= MAX_RETRIES {
                    tracing::warn!(operation, attempt, "provider call timed out, not retrying");
                    return Err(RagError::ProviderError(format!("{operation} timed out after {TIMEOUT:?}")));
                }
                tracing::warn!(operation, attempt, "provider call timed out, retrying");
            }
        }
        tokio::time::sleep(backoff_delay(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ProviderCallError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderCallError::with_status("busy", 429))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderCallError::with_status("bad request", 400)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, _> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderCallError::with_status("down", 503)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
