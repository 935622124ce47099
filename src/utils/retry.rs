//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::transfer::{CommandError, ErrorCode};

/// Backoff for a worker registering with the fleet registry.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn registration_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Determines if a failed exchange is worth retrying.
///
/// Retryable codes:
/// - `ReplyNoHandlers`: the registry is not bound yet
/// - `ReplyTimeout`, `ReplyRecipientFailure`: the exchange itself failed
///
/// Non-retryable: malformed requests and refusals, which will never succeed
/// on retry.
pub fn is_retryable(error: &CommandError) -> bool {
    matches!(
        error.code,
        ErrorCode::ReplyNoHandlers | ErrorCode::ReplyTimeout | ErrorCode::ReplyRecipientFailure
    )
}
