//! Bounded retry with exponential backoff
//!
//! Rate limiting and gateway errors are retried, as are connection failures
//! and timeouts. `401` and `404` never are: the first is handled by
//! re-authenticating and the second is final.

use crate::errors::PullError;
use reqwest::{header, header::HeaderMap, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest we will honour a server's `Retry-After`
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total tries for one request, including the first
    pub max_attempts: u32,
    /// Delay after the first failure; doubles for each further one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
    }

    /// May we try again after `attempt` (counting from 1) has failed?
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before the attempt following `attempt`: 1x, 2x, 4x ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Backoff, stretched to a `Retry-After` header given in seconds
    pub fn backoff_for_response(&self, attempt: u32, headers: &HeaderMap) -> Duration {
        let backoff = self.backoff(attempt);
        let retry_after = headers
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER));
        match retry_after {
            Some(retry_after) if retry_after > backoff => retry_after,
            _ => backoff,
        }
    }
}

/// Sleep, waking early with [PullError::Cancelled] if the token fires
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), PullError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PullError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
