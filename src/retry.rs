//! Retry and backoff policy.
//!
//! The remote client never retries on its own; download tasks wrap each
//! remote operation in [`run_with_retry`] so every call site shares the same
//! classification and backoff decisions.

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::time::Duration;
use tracing::debug;

use crate::error::{HarvestError, RemoteError};

/// Application code the platform returns when it throttles a client
pub const THROTTLED_API_CODE: i64 = -412;

/// High-level classification of an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation timed out (connect/read).
    Timeout,
    /// Server asked us to slow down (e.g. 412, 429).
    Throttled,
    /// Network-level failure (connection reset, DNS, etc.).
    Connection,
    /// Retryable server-side failure (5xx).
    Http5xx(u16),
    /// Anything else; never retried.
    Other,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `attempt` is 1-based (1 = first attempt).
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::NoRetry;
        }

        match kind {
            ErrorKind::Other => RetryDecision::NoRetry,
            ErrorKind::Timeout
            | ErrorKind::Connection
            | ErrorKind::Throttled
            | ErrorKind::Http5xx(_) => {
                // base * 2^(attempt-1), capped
                let exp = 1u32 << attempt.saturating_sub(1).min(8);
                let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
                RetryDecision::RetryAfter(delay)
            }
        }
    }
}

/// Errors that know how they should be retried
pub trait Retryable {
    fn error_kind(&self) -> ErrorKind;
}

/// Map an HTTP status to its retry kind
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        412 | 429 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(status),
        _ => ErrorKind::Other,
    }
}

fn classify_io(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => ErrorKind::Connection,
        _ => ErrorKind::Other,
    }
}

impl Retryable for RemoteError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            RemoteError::Status { status, .. } => classify_http_status(*status),
            RemoteError::Api { code, .. } if *code == THROTTLED_API_CODE => ErrorKind::Throttled,
            RemoteError::Api { .. } | RemoteError::Malformed(_) => ErrorKind::Other,
            RemoteError::Transport(e) if e.is_timeout() => ErrorKind::Timeout,
            RemoteError::Transport(e) if e.is_connect() || e.is_request() || e.is_body() => {
                ErrorKind::Connection
            }
            RemoteError::Transport(_) => ErrorKind::Other,
        }
    }
}

impl Retryable for HarvestError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            HarvestError::Remote(e) => e.error_kind(),
            HarvestError::Io { source, .. } => classify_io(source),
            _ => ErrorKind::Other,
        }
    }
}

/// Runs an async operation until it succeeds or the policy says to stop,
/// sleeping for the backoff delay between attempts.
pub async fn run_with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match policy.decide(attempt, e.error_kind()) {
                RetryDecision::NoRetry => return Err(e),
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        "🔁 {} failed (attempt {}/{}): {}; retrying in {:?}",
                        label, attempt, policy.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn no_retry_for_other() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Other), RetryDecision::NoRetry);
    }

    #[test]
    fn exponential_backoff_grows_and_is_capped() {
        let mut p = RetryPolicy::default();
        p.max_attempts = 20;
        let delay = |attempt| match p.decide(attempt, ErrorKind::Timeout) {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::NoRetry => panic!("expected retry"),
        };
        assert!(delay(2) > delay(1));
        assert_eq!(delay(12), p.max_delay);
    }

    #[test]
    fn throttling_codes_are_retryable() {
        let api = RemoteError::Api {
            code: THROTTLED_API_CODE,
            message: "request was banned".to_string(),
        };
        assert_eq!(api.error_kind(), ErrorKind::Throttled);
        assert_eq!(classify_http_status(429), ErrorKind::Throttled);
        assert_eq!(classify_http_status(502), ErrorKind::Http5xx(502));
        assert_eq!(classify_http_status(404), ErrorKind::Other);

        let missing = RemoteError::Api {
            code: -404,
            message: "not found".to_string(),
        };
        assert_eq!(missing.error_kind(), ErrorKind::Other);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RemoteError> = run_with_retry(&fast_policy(3), "op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(RemoteError::Status {
                    status: 503,
                    url: "http://x".to_string(),
                })
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RemoteError> = run_with_retry(&fast_policy(5), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Malformed("bad json".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
