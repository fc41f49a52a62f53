//! Retry with exponential backoff, applied to a task operation before submission

use std::future::Future;
use std::time::Duration;

use crate::error::TaskError;

/// How many times to retry a transient failure and how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: base * 2^(attempt-1) (2s, 4s, 8s, ... for a 2s base)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Run `attempt_fn`, retrying retryable errors with exponential backoff.
///
/// Returns the first success, or the final error on exhaustion or a
/// non-retryable error. The executor itself never retries; wrap an operation
/// with this before building its [`Task`](crate::Task).
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    attempt_fn: F,
) -> Result<T, TaskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    with_retry_when(policy, label, TaskError::is_retryable, attempt_fn).await
}

/// Like [`with_retry`], but only errors accepted by `should_retry` are retried.
pub async fn with_retry_when<T, F, Fut, R>(
    policy: RetryPolicy,
    label: &str,
    should_retry: R,
    mut attempt_fn: F,
) -> Result<T, TaskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
    R: Fn(&TaskError) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && should_retry(&e) => {
                attempt += 1;
                let delay = policy.backoff_duration(attempt);
                log::debug!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if attempt > 0 {
                    log::warn!("{label}: failed after {} attempts: {e}", attempt + 1);
                }
                return Err(e);
            }
        }
    }
}
