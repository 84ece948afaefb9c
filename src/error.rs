//! Client error types with retry classification.
//!
//! [`ClientError`] is the central error type for the client. Each variant
//! carries a numeric code and tells the caller whether the failure is
//! worth retrying, so the connection layer and the request layer can apply
//! one uniform policy.

use std::fmt;

/// Classifies a failed data call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestErrorKind {
    /// No response was received (connect failure, reset, timeout).
    Network,
    /// The server answered with a 5xx status.
    ServerError,
    /// The server answered with a 4xx status other than 401.
    ClientError,
}

impl RequestErrorKind {
    /// Classifies an HTTP status code. Returns `None` for success codes.
    #[must_use]
    pub const fn from_status(status: u16) -> Option<Self> {
        match status {
            500..=599 => Some(Self::ServerError),
            400..=499 => Some(Self::ClientError),
            _ => None,
        }
    }
}

impl fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::ServerError => write!(f, "server error"),
            Self::ClientError => write!(f, "client error"),
        }
    }
}

/// Client-side error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category    | Retried by this crate        |
/// |-----------|-------------|------------------------------|
/// | 1000–1999 | Auth        | never                        |
/// | 2000–2999 | Connection  | via reconnection backoff     |
/// | 3000–3999 | Request     | once, for network and 5xx    |
/// | 4000–4999 | Local       | never                        |
///
/// The type is `Clone` so a single failed fetch can be handed to every
/// caller that was coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No credential is available.
    #[error("authentication required")]
    AuthRequired,

    /// The credential expired and could not be refreshed, or the server
    /// rejected it.
    #[error("session expired; log in again")]
    AuthExpired,

    /// Socket-level failure on the persistent connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or rejected protocol frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Network-layer or HTTP-layer failure on a data call.
    #[error("{kind} request failure{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Request {
        /// Failure class.
        kind: RequestErrorKind,
        /// HTTP status, when the server responded.
        status: Option<u16>,
        /// Human-readable description.
        message: String,
    },

    /// Caller-supplied arguments were rejected before any I/O.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An operation needed the persistent connection and it is not up.
    #[error("not connected")]
    NotConnected,

    /// Internal failure (task panicked, channel closed).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Builds a [`ClientError::Request`] for a network-level failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Request {
            kind: RequestErrorKind::Network,
            status: None,
            message: message.into(),
        }
    }

    /// Builds a [`ClientError::Request`] from a non-success HTTP status.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = RequestErrorKind::from_status(status).unwrap_or(RequestErrorKind::ClientError);
        Self::Request {
            kind,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::AuthRequired => 1001,
            Self::AuthExpired => 1002,
            Self::Transport(_) => 2001,
            Self::Protocol(_) => 2002,
            Self::NotConnected => 2003,
            Self::Request {
                kind: RequestErrorKind::Network,
                ..
            } => 3001,
            Self::Request {
                kind: RequestErrorKind::ServerError,
                ..
            } => 3002,
            Self::Request {
                kind: RequestErrorKind::ClientError,
                ..
            } => 3003,
            Self::InvalidRequest(_) => 4001,
            Self::Internal(_) => 4000,
        }
    }

    /// Returns `true` for failures the request layer retries: network
    /// errors (including timeouts) and 5xx responses.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Request {
                kind: RequestErrorKind::Network | RequestErrorKind::ServerError,
                ..
            }
        )
    }

    /// Returns `true` if the caller should be sent back to the login flow.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRequired | Self::AuthExpired)
    }

    /// Returns the HTTP status carried by a request failure, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            RequestErrorKind::from_status(503),
            Some(RequestErrorKind::ServerError)
        );
        assert_eq!(
            RequestErrorKind::from_status(404),
            Some(RequestErrorKind::ClientError)
        );
        assert_eq!(RequestErrorKind::from_status(204), None);
    }

    #[test]
    fn only_network_and_server_errors_retry() {
        assert!(ClientError::network("reset").is_retryable());
        assert!(ClientError::from_status(502, "bad gateway").is_retryable());
        assert!(!ClientError::from_status(400, "bad").is_retryable());
        assert!(!ClientError::AuthExpired.is_retryable());
        assert!(!ClientError::Transport("closed".into()).is_retryable());
    }

    #[test]
    fn display_includes_status() {
        let err = ClientError::from_status(500, "boom");
        assert_eq!(err.to_string(), "server error request failure (status 500): boom");
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.error_code(), 3002);
    }

    #[test]
    fn auth_variants_flagged() {
        assert!(ClientError::AuthRequired.is_auth());
        assert!(ClientError::AuthExpired.is_auth());
        assert!(!ClientError::NotConnected.is_auth());
    }
}
