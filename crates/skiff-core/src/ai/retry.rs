//! Rate limiting and retry logic for provider HTTP calls.
//!
//! Exponential backoff with jitter for transient errors (429, 5xx).
//! A server-sent `Retry-After` hint overrides the computed delay. This
//! backoff is internal to the provider layer and unrelated to the
//! orchestrator's incomplete-tool-call retry protocol.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::AgentError;

/// Retry behavior for one provider call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP statuses worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// A failed HTTP attempt, before it is promoted to an [`AgentError`].
#[derive(Debug)]
pub struct HttpFailure {
    pub status: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl HttpFailure {
    /// Transport-level failure (connect, TLS, body read). Always
    /// retryable: there is no status to say otherwise.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self {
            status: None,
            message: err.to_string(),
            retry_after: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.status.map(is_retryable_status).unwrap_or(true)
    }

    /// Promote to the public error type, tagging the provider.
    pub fn into_agent_error(self, provider: &str) -> AgentError {
        if self.status == Some(429) {
            return AgentError::RateLimited {
                provider: provider.to_string(),
                retry_after: self.retry_after,
            };
        }
        AgentError::Provider {
            provider: provider.to_string(),
            message: self.message,
        }
    }
}

/// Run `op` with retries on transient failures.
///
/// Delay per attempt: the server's `Retry-After` hint when present,
/// otherwise exponential backoff from `base_delay` with 50-100% jitter,
/// capped at `max_delay`.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> Result<T, HttpFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HttpFailure>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                if attempt >= config.max_attempts || !failure.is_retryable() {
                    return Err(failure);
                }
                let delay = failure
                    .retry_after
                    .unwrap_or_else(|| backoff_delay(config, attempt));
                warn!(
                    attempt,
                    status = ?failure.status,
                    delay_ms = delay.as_millis() as u64,
                    "{label} transient failure, retrying: {}",
                    failure.message
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn backoff_delay(config: &RetryConfig, attempt: usize) -> Duration {
    let exp = config
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1) as u32));
    let capped = exp.min(config.max_delay);
    let jitter = rand::thread_rng().gen_range(0.5..=1.0);
    capped.mul_f64(jitter)
}
