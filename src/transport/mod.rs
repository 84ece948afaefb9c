//! Transport layer: STOMP framing, subscriptions, and the socket
//! implementations behind the [`Transport`] and [`Connector`] traits.
//!
//! The connection manager only sees the traits, so the socket
//! implementation can be swapped (and mocked in tests).

pub mod destinations;
pub mod frame;
pub mod subscription;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ClientError;

pub use frame::{Command, Frame, FrameBuffer};
pub use subscription::{
    MessageHandler, Payload, Registration, SubscriptionHandle, SubscriptionRegistry,
    SubscriptionStatus,
};
pub use websocket::WsConnector;

/// Which kind of socket a connection attempt uses.
///
/// Attempts alternate between the two so that a network path that breaks
/// one kind of transport does not permanently block connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportVariant {
    /// SockJS-framed websocket (`/{server}/{session}/websocket`).
    SockJs,
    /// Plain websocket on the endpoint itself.
    RawWebSocket,
}

impl TransportVariant {
    /// Variant used by the `attempt`-th connection attempt (zero-based).
    #[must_use]
    pub const fn for_attempt(attempt: u64) -> Self {
        if attempt % 2 == 0 {
            Self::SockJs
        } else {
            Self::RawWebSocket
        }
    }
}

impl fmt::Display for TransportVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SockJs => write!(f, "sockjs"),
            Self::RawWebSocket => write!(f, "websocket"),
        }
    }
}

/// An open, bidirectional STOMP frame stream.
#[async_trait]
pub trait Transport: Send {
    /// Variant this transport was opened with.
    fn variant(&self) -> TransportVariant;

    /// Sends one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the socket write fails.
    async fn send(&mut self, frame: &Frame) -> Result<(), ClientError>;

    /// Sends a STOMP heart-beat (a bare end-of-line).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the socket write fails.
    async fn send_heartbeat(&mut self) -> Result<(), ClientError>;

    /// Waits for the next inbound frame. `None` means the peer closed.
    async fn recv(&mut self) -> Option<Result<Frame, ClientError>>;

    /// Whether the underlying socket still reports itself open.
    fn is_connected(&self) -> bool;

    /// Closes the socket. Idempotent.
    async fn close(&mut self);
}

/// Opens transports to a fixed endpoint.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Opens a transport of the given variant.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the socket cannot be opened.
    async fn open(&self, variant: TransportVariant) -> Result<Box<dyn Transport>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_alternate() {
        assert_eq!(TransportVariant::for_attempt(0), TransportVariant::SockJs);
        assert_eq!(TransportVariant::for_attempt(1), TransportVariant::RawWebSocket);
        assert_eq!(TransportVariant::for_attempt(2), TransportVariant::SockJs);
    }
}
