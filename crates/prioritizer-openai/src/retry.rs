//! Exponential backoff retry for OpenAI API calls.
//!
//! Mirrors the teacher's `ChatOpenAI`/`OpenAIEmbeddings` retry shape
//! (`RetryPolicy::exponential(n)` plus a `with_retry(&policy, closure)`
//! helper) without depending on the teacher's own retry module, which isn't
//! part of this workspace.

use std::time::Duration;

use async_openai::error::OpenAIError;
use rand::Rng;

/// Backoff schedule for a retryable OpenAI call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: Duration,
}

impl RetryPolicy {
    /// `max_retries` attempts beyond the first, doubling from a 200ms base
    /// up to a 10s cap, no jitter.
    #[must_use]
    pub fn exponential(max_retries: u32) -> Self {
        Self::exponential_with_params(max_retries, 200, 10_000)
    }

    #[must_use]
    pub fn exponential_with_params(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn exponential_jitter(
        max_retries: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
        jitter_ms: u64,
    ) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            multiplier,
            jitter: Duration::from_millis(jitter_ms),
        }
    }

    /// A policy with zero retries, for test-mode configuration.
    #[must_use]
    pub fn none() -> Self {
        Self::exponential_with_params(0, 0, 0)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let mut delay = Duration::from_secs_f64(capped.max(0.0));
        if self.jitter > Duration::ZERO {
            let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
            delay += Duration::from_millis(jitter_ms);
        }
        delay
    }
}

/// Errors worth retrying: rate limiting, transient server failures, and bare
/// transport errors. Authentication, bad-request, and not-found errors fail
/// fast (§5 invariant: a fatal upstream error must not burn the retry
/// budget).
fn is_retryable(err: &OpenAIError) -> bool {
    match err {
        OpenAIError::Reqwest(_) => true,
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or_default();
            let kind = api_err.r#type.as_deref().unwrap_or_default();
            code.contains("rate_limit")
                || code.contains("server_error")
                || kind.contains("server_error")
                || kind.contains("rate_limit")
        }
        _ => false,
    }
}

/// Runs `f` up to `policy.max_retries + 1` times, backing off between
/// retryable failures and returning the first non-retryable error or the
/// last retryable one once the budget is exhausted.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, OpenAIError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, OpenAIError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_retryable(&err) => {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> OpenAIError {
        OpenAIError::ApiError(async_openai::error::ApiError {
            message: "rate limited".to_string(),
            r#type: Some("rate_limit_error".to_string()),
            param: None,
            code: Some("rate_limit_exceeded".to_string()),
        })
    }

    fn invalid_key() -> OpenAIError {
        OpenAIError::ApiError(async_openai::error::ApiError {
            message: "invalid key".to_string(),
            r#type: Some("invalid_request_error".to_string()),
            param: None,
            code: Some("invalid_api_key".to_string()),
        })
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential_with_params(3, 1, 10);
        let result = with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(rate_limited())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fails_fast_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential_with_params(3, 1, 10);
        let result: Result<(), OpenAIError> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(invalid_key()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential_with_params(2, 1, 10);
        let result: Result<(), OpenAIError> = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(rate_limited()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
