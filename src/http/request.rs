//! Request and response values passed through the request layer.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ClientError;

/// Whether a call carries the bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Login, register and refresh: no credential, no session handling.
    Public,
    /// Credential injected; 401 ends the session.
    Protected,
}

/// Whether the request layer may retry a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// One retry on network errors and 5xx.
    Idempotent,
    /// Never retried by the request layer.
    Never,
}

/// One logical call to the data API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API base URL, starting with `/`.
    pub path: String,
    /// Query parameters in order.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Credential handling.
    pub access: Access,
    /// Retry policy.
    pub retry: RetryMode,
    /// Per-attempt timeout; `None` uses the client default.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// Protected, idempotent request with no query or body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            access: Access::Protected,
            retry: RetryMode::Idempotent,
            timeout: None,
        }
    }

    /// `GET path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT path`.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `DELETE path`.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    /// Appends a query parameter when `value` is `Some`.
    #[must_use]
    pub fn query_opt(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(name, value),
            None => self,
        }
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Marks the call public (no credential).
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.access = Access::Public;
        self
    }

    /// Disables request-layer retry.
    #[must_use]
    pub const fn no_retry(mut self) -> Self {
        self.retry = RetryMode::Never;
        self
    }

    /// Overrides the per-attempt timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response that reached the client, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body; `Null` when empty or not JSON.
    pub body: Value,
}

impl ApiResponse {
    /// `true` for 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Error message from the body (`message` or `error` field), falling
    /// back to the status code.
    #[must_use]
    pub fn error_message(&self) -> String {
        ["message", "error"]
            .iter()
            .find_map(|field| self.body.get(field).and_then(Value::as_str))
            .map_or_else(|| format!("HTTP {}", self.status), str::to_string)
    }

    /// Deserializes the body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        serde_json::from_value(self.body)
            .map_err(|e| ClientError::Protocol(format!("unexpected response body: {e}")))
    }
}
