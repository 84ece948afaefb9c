//! Retry bookkeeping.

use std::future::Future;
use std::time::Duration;

use super::request::RetryMode;
use crate::error::ClientError;

/// Attempt counter for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempts started so far.
    pub attempt: u32,
    /// Attempts allowed in total.
    pub max_attempts: u32,
}

impl RetryContext {
    /// Context allowing `max_attempts` attempts (at least one).
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
        }
    }

    /// Two attempts for idempotent calls, one otherwise.
    #[must_use]
    pub const fn for_mode(mode: RetryMode) -> Self {
        match mode {
            RetryMode::Idempotent => Self::new(2),
            RetryMode::Never => Self::new(1),
        }
    }

    /// Records the start of an attempt.
    pub const fn begin(&mut self) {
        self.attempt += 1;
    }

    /// Whether `error` from the current attempt should be retried.
    #[must_use]
    pub const fn should_retry(&self, error: &ClientError) -> bool {
        self.attempt < self.max_attempts && error.is_retryable()
    }
}

/// Runs `op`, retrying retryable failures once per entry of `delays`
/// after waiting that long.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once `delays`
/// is exhausted.
pub async fn with_retries<T, F, Fut>(
    operation: &str,
    delays: &[Duration],
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut schedule = delays.iter();
    let mut attempt = 1u32;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => err,
            Err(err) => return Err(err),
        };
        let Some(delay) = schedule.next() else {
            tracing::warn!(operation, attempt, error = %err, "retries exhausted");
            return Err(err);
        };
        tracing::info!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying"
        );
        tokio::time::sleep(*delay).await;
        attempt += 1;
    }
}
