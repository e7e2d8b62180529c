//! Retry with exponential backoff for backend API calls

use std::time::Duration;

use super::transport::{HttpRequest, Method};

/// Header whose presence makes a non-idempotent request safe to retry
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Retry policy for backend API calls
///
/// Controls how many times a request is attempted and how long to wait
/// between attempts using exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Retry POSTs that carry no idempotency key
    ///
    /// Enabled by default, which retries every method uniformly. A retried
    /// chat POST can produce a duplicate reply on the server unless the
    /// server deduplicates by [`IDEMPOTENCY_KEY_HEADER`].
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_non_idempotent: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Number of attempts allowed for this request
    #[must_use]
    pub fn attempts_for(&self, request: &HttpRequest) -> u32 {
        let max = self.max_attempts.max(1);

        match request.method {
            Method::Get => max,
            Method::Post => {
                if self.retry_non_idempotent || request.header(IDEMPOTENCY_KEY_HEADER).is_some() {
                    max
                } else {
                    1
                }
            }
        }
    }
}

/// Compute the delay after the `attempt`-th failure (1-based).
///
/// Follows `base_delay * 2^(attempt - 1)`, capped at `policy.max_delay`.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);

    policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(policy.max_delay)
}
