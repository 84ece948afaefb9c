//! Broadcast channel for session lifecycle events.
//!
//! [`SessionBus`] wraps a [`tokio::sync::broadcast`] channel. The request
//! layer publishes [`SessionEvent::Ended`] whenever the credential is
//! rejected or cannot be refreshed; the application subscribes and sends
//! the user back to the login flow.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// The credential expired and the refresh attempt failed.
    RefreshFailed,
    /// The server answered a protected call with 401.
    Unauthorized,
    /// The application logged out.
    LoggedOut,
}

/// Session lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Local credential state was cleared; a new login is required.
    Ended {
        /// Cause of the session end.
        reason: SessionEndReason,
        /// Request path that triggered it, if any.
        path: Option<String>,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`SessionEvent`]s.
///
/// When the ring buffer is full, the oldest events are dropped for lagging
/// receivers.
#[derive(Debug, Clone)]
pub struct SessionBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionBus {
    /// Creates a new `SessionBus` with the given channel capacity.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Publishes [`SessionEvent::Ended`] for `reason`.
    pub fn session_ended(&self, reason: SessionEndReason, path: Option<&str>) -> usize {
        tracing::warn!(?reason, path, "session ended");
        self.publish(SessionEvent::Ended {
            reason,
            path: path.map(str::to_string),
            timestamp: Utc::now(),
        })
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
