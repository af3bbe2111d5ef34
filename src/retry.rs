//! Retry policy shared by the blocking HTTP clients.

use std::time::Duration;

use reqwest::StatusCode;

/// Rate limiting and server errors are worth another attempt.
pub(crate) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Transport failures that may clear up on their own.
pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

/// Exponential backoff starting at one second, capped at 16 seconds.
pub(crate) fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}
