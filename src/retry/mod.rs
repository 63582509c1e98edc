// Retry module
// Centralized retry loop with error classification and bounded exponential
// backoff, shared by the embedding and completion clients


use std::time::Duration;
use tracing::{debug, warn};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// How a failed upstream call should be handled by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Upstream asked us to slow down; retry after a backoff delay.
    RateLimited,
    /// Temporary failure (server error, transport problem, timeout); retry.
    Transient,
    /// Permanent failure; propagate immediately without retrying.
    Fatal,
}

/// Bounded exponential backoff settings.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each subsequent attempt.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay after the given 1-based attempt number.
    #[inline]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1));
        let factor = u32::try_from(factor).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Final error of a retried operation, carrying the classification of the
/// last failure and how many attempts were made.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub kind: FailureKind,
    pub attempts: u32,
    pub error: E,
}

/// Run a blocking operation with bounded retries.
///
/// Each error is classified by `classify`: `Fatal` errors return immediately,
/// `RateLimited` and `Transient` errors sleep for the policy's backoff delay
/// and retry until attempts are exhausted. The final failure keeps its
/// classification so callers can surface rate limiting distinctly from an
/// unavailable upstream.
#[inline]
pub fn retry<T, E, F, C>(
    policy: &RetryPolicy,
    classify: C,
    mut op: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Result<T, E>,
    C: Fn(&E) -> FailureKind,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!("Request attempt {}/{}", attempt, policy.max_attempts);

        let error = match op() {
            Ok(value) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(value);
            }
            Err(error) => error,
        };

        let kind = classify(&error);

        if kind == FailureKind::Fatal {
            warn!("Non-retryable error: {}", error);
            return Err(RetryFailure {
                kind,
                attempts: attempt,
                error,
            });
        }

        if attempt >= policy.max_attempts {
            warn!("Giving up after {} attempts: {}", attempt, error);
            return Err(RetryFailure {
                kind,
                attempts: attempt,
                error,
            });
        }

        let delay = policy.backoff_delay(attempt);
        warn!(
            "Retryable error ({:?}) on attempt {}/{}: {}, waiting {:?}",
            kind, attempt, policy.max_attempts, error, delay
        );
        std::thread::sleep(delay);
    }
}

/// Classify a `ureq` error for the retry loop.
///
/// HTTP 429 is rate limiting, 5xx and transport failures are transient,
/// every other status is a caller error and fatal.
#[inline]
pub fn classify_http(error: &ureq::Error) -> FailureKind {
    match error {
        ureq::Error::StatusCode(status) => {
            if *status == 429 {
                FailureKind::RateLimited
            } else if *status >= 500 {
                FailureKind::Transient
            } else {
                FailureKind::Fatal
            }
        }
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => FailureKind::Transient,
        _ => FailureKind::Fatal,
    }
}
