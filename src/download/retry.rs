//! Retry logic with exponential backoff for transient transfer failures.
//!
//! A failed transfer is classified into a [`FailureType`]; the
//! [`RetryPolicy`] then decides whether another attempt is worth making
//! and with what delay. Only transport-class failures are retried;
//! everything else fails the item immediately.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::transport::FetchError;

/// Default maximum attempts (including the initial attempt).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of transfer failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry (network errors,
    /// timeouts, 5xx, truncated bodies).
    Transient,

    /// Server rate limiting (HTTP 429); retried with backoff, preferring
    /// the server's Retry-After delay when present.
    RateLimited,

    /// Failure that won't succeed regardless of retries (4xx other than
    /// 408/429, local IO, malformed URLs, cancellation).
    Permanent,
}

/// Decision on whether to retry a failed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// Delay formula: `min(base_delay * multiplier^(attempt-1), max_delay) + jitter`.
/// With defaults, delays are approximately 1s, 2s before attempts run out.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy with custom settings.
    ///
    /// `max_attempts` includes the initial attempt and is clamped to >= 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom attempt bound, defaults elsewhere.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt bound.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether a failed attempt should be retried.
    ///
    /// `attempt` is the attempt number that just failed (1-indexed).
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay for a retry with exponential backoff plus jitter.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        // attempt 1 gets 1x base, attempt 2 gets multiplier x base, ...
        let exponent = f64::from(attempt - 1);
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + jitter()
    }
}

/// Random jitter between 0 and [`MAX_JITTER`] to spread simultaneous
/// retries apart.
fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

/// Classifies a transport failure for retry decisions.
///
/// | Failure | Type |
/// |---------|------|
/// | Network (DNS, refused connection, reset) | Transient |
/// | Timeout | Transient |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | Other HTTP 4xx | Permanent |
/// | Truncated body | Transient |
/// | Local IO, invalid URL, config, cancelled | Permanent |
#[must_use]
pub fn classify_fetch_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::Network { .. } | FetchError::Timeout { .. } | FetchError::Truncated { .. } => {
            FailureType::Transient
        }
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::Io { .. }
        | FetchError::InvalidUrl { .. }
        | FetchError::Config { .. }
        | FetchError::Cancelled { .. } => FailureType::Permanent,
    }
}

fn classify_http_status(status: u16) -> FailureType {
    match status {
        429 => FailureType::RateLimited,
        408 => FailureType::Transient,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_failure_never_retried() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_transient_failure_retried_until_bound() {
        let policy = RetryPolicy::with_max_attempts(3);

        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        let last = policy.should_retry(FailureType::Transient, 3);
        assert!(matches!(last, RetryDecision::DoNotRetry { .. }));
        if let RetryDecision::DoNotRetry { reason } = last {
            assert!(reason.contains("exhausted"));
        }
    }

    #[test]
    fn test_rate_limited_is_retryable() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::RateLimited, 1),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_millis(400),
            2.0,
        );

        let delay_at = |attempt| match policy.should_retry(FailureType::Transient, attempt) {
            RetryDecision::Retry { delay, .. } => delay,
            RetryDecision::DoNotRetry { .. } => panic!("expected retry"),
        };

        // Jitter adds at most 500ms on top of the deterministic part.
        assert!(delay_at(1) >= Duration::from_millis(100));
        assert!(delay_at(2) >= Duration::from_millis(200));
        assert!(delay_at(5) >= Duration::from_millis(400));
        assert!(delay_at(5) <= Duration::from_millis(400) + MAX_JITTER);
    }

    #[test]
    fn test_max_attempts_clamped_to_one() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_classify_http_statuses() {
        let err = |status| FetchError::HttpStatus {
            url: "https://a.example/f.pdf".to_string(),
            status,
            retry_after: None,
        };
        assert_eq!(classify_fetch_error(&err(404)), FailureType::Permanent);
        assert_eq!(classify_fetch_error(&err(408)), FailureType::Transient);
        assert_eq!(classify_fetch_error(&err(429)), FailureType::RateLimited);
        assert_eq!(classify_fetch_error(&err(500)), FailureType::Transient);
        assert_eq!(classify_fetch_error(&err(503)), FailureType::Transient);
    }

    #[test]
    fn test_classify_non_http_errors() {
        assert_eq!(
            classify_fetch_error(&FetchError::Timeout {
                url: "https://a.example".to_string()
            }),
            FailureType::Transient
        );
        assert_eq!(
            classify_fetch_error(&FetchError::Truncated {
                url: "https://a.example".to_string(),
                expected: 10,
                actual: 5
            }),
            FailureType::Transient
        );
        assert_eq!(
            classify_fetch_error(&FetchError::InvalidUrl {
                url: "::".to_string()
            }),
            FailureType::Permanent
        );
        assert_eq!(
            classify_fetch_error(&FetchError::Cancelled {
                url: "https://a.example".to_string()
            }),
            FailureType::Permanent
        );
    }
}
