//! Reconnection delay policy.

use std::time::Duration;

use crate::config::ConnectionConfig;

/// Outcome of recording one more consecutive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Schedule a reconnect after `delay`.
    Retry {
        /// Wait before the next attempt.
        delay: Duration,
        /// Consecutive failure count including this one.
        attempt: u32,
    },
    /// Too many consecutive failures; stop retrying.
    Exhausted {
        /// Consecutive failure count including this one.
        attempt: u32,
    },
}

/// Linear, capped reconnect backoff.
///
/// With `n` consecutive failures recorded before the current one, the next
/// attempt waits `min(base * (n + 1), max)`. Once the failure count exceeds
/// `max_attempts`, the policy reports [`Backoff::Exhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    /// Policy described by `config`.
    #[must_use]
    pub const fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            config.reconnect_base,
            config.reconnect_max,
            config.max_reconnect_attempts,
        )
    }

    /// Delay after a failure when `previous` failures were already counted.
    #[must_use]
    pub fn delay(&self, previous: u32) -> Duration {
        self.base
            .checked_mul(previous.saturating_add(1))
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Classifies the failure that follows `previous` consecutive failures.
    #[must_use]
    pub fn next(&self, previous: u32) -> Backoff {
        let attempt = previous.saturating_add(1);
        if attempt > self.max_attempts {
            Backoff::Exhausted { attempt }
        } else {
            Backoff::Retry {
                delay: self.delay(previous),
                attempt,
            }
        }
    }
}
