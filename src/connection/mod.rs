//! Persistent connection lifecycle.
//!
//! [`ConnectionManager`] owns the single STOMP session of a client. It
//! authenticates, replays subscriptions, watches transport health and
//! reconnects with the linear backoff of [`ReconnectPolicy`].
//!
//! ```text
//!               connect()                      CONNECTED
//!  Disconnected ─────────▶ Connecting ───────────────────▶ Connected
//!       ▲                   │   ▲  │                          │
//!       │ disconnect()      │   │  └─ failure, timer ◀────────┘ failure
//!       │                   │   └──── timer fires
//!       │                   ▼ attempts exhausted
//!       └────────────────  Failed  ◀── connect() resets the count
//! ```

pub mod backoff;
pub mod manager;
mod session;

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub use backoff::{Backoff, ReconnectPolicy};
pub use manager::ConnectionManager;

/// Lifecycle state of the persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Disconnected,
    /// A connect attempt is running or a reconnect timer is pending.
    Connecting,
    /// Handshake done; subscriptions are live.
    Connected,
    /// Reconnection attempts exhausted; waits for an explicit `connect()`.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of the reconnection bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconnectStatus {
    /// Consecutive failures since the last successful connect.
    pub attempt_count: u32,
    /// Delay of the pending reconnect timer, if one is scheduled.
    pub pending_delay: Option<Duration>,
    /// Reconnect timers scheduled over the manager's lifetime.
    pub timers_scheduled: u64,
}
