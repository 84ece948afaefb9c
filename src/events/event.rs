//! Lifecycle events emitted by the connection manager.
//!
//! Every [`ClientEvent`] belongs to exactly one [`EventChannel`]; listeners
//! register per channel.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::transport::{Payload, TransportVariant};

/// Named channel a listener can register on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    /// The connection reached `Connected`.
    Connect,
    /// The connection went down, deliberately or not.
    Disconnect,
    /// A connection-level failure occurred.
    Error,
    /// An inbound message was delivered to a subscription.
    Message,
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Disconnect => write!(f, "disconnect"),
            Self::Error => write!(f, "error"),
            Self::Message => write!(f, "message"),
        }
    }
}

/// Connection lifecycle event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The broker acknowledged the STOMP handshake and all registered
    /// destinations were re-subscribed.
    Connected {
        /// Transport variant that succeeded.
        transport: TransportVariant,
        /// Destinations re-subscribed as part of this connect.
        replayed: usize,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// The connection went down.
    Disconnected {
        /// Why the connection closed.
        reason: String,
        /// `true` when the caller asked for the disconnect.
        deliberate: bool,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A connection-level failure.
    Error {
        /// Human-readable description.
        message: String,
        /// `false` once reconnection attempts are exhausted.
        recoverable: bool,
        /// Consecutive failure count after this failure.
        attempt: u32,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// An inbound message delivered to a subscription.
    Message {
        /// Destination the message arrived on.
        destination: String,
        /// Parsed (or raw) body.
        payload: Payload,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    /// Returns the channel this event is dispatched on.
    #[must_use]
    pub const fn channel(&self) -> EventChannel {
        match self {
            Self::Connected { .. } => EventChannel::Connect,
            Self::Disconnected { .. } => EventChannel::Disconnect,
            Self::Error { .. } => EventChannel::Error,
            Self::Message { .. } => EventChannel::Message,
        }
    }

    /// Returns the event timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Connected { timestamp, .. }
            | Self::Disconnected { timestamp, .. }
            | Self::Error { timestamp, .. }
            | Self::Message { timestamp, .. } => *timestamp,
        }
    }
}
