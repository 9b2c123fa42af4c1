//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::auth::AuthError;
use crate::error::LauncherError;

/// Error types that can describe an elapsed deadline.
pub trait TimedOut {
    fn timed_out(millis: u64) -> Self;
}

impl TimedOut for AuthError {
    fn timed_out(millis: u64) -> Self {
        AuthError::Timeout(millis)
    }
}

impl TimedOut for LauncherError {
    fn timed_out(millis: u64) -> Self {
        LauncherError::Timeout(millis)
    }
}

/// Wrap a future with a timeout.
pub async fn with_timeout<T, E: TimedOut>(
    duration: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, E> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(E::timed_out(duration.as_millis() as u64)),
    }
}
