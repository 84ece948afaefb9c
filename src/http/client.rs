//! The request client.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::backend::HttpBackend;
use super::credentials::CredentialStore;
use super::request::{Access, ApiRequest, ApiResponse};
use super::retry::RetryContext;
use super::throttle::Throttle;
use crate::config::RequestConfig;
use crate::error::ClientError;
use crate::events::{SessionBus, SessionEndReason};

/// Wraps every data API call with credential injection, proactive
/// refresh, throttling, per-request timeouts and a single retry of
/// idempotent failures.
///
/// A 401 on a protected call, or a failed refresh, clears the credential
/// store and announces [`crate::events::SessionEvent::Ended`] on the
/// session bus.
pub struct RequestClient {
    config: RequestConfig,
    backend: Arc<dyn HttpBackend>,
    credentials: Arc<dyn CredentialStore>,
    session: SessionBus,
    throttle: Throttle,
}

impl fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestClient")
            .field("base_url", &self.config.base_url)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl RequestClient {
    /// Creates a client.
    #[must_use]
    pub fn new(
        config: RequestConfig,
        backend: Arc<dyn HttpBackend>,
        credentials: Arc<dyn CredentialStore>,
        session: SessionBus,
    ) -> Self {
        let throttle = Throttle::new(config.throttle_interval);
        Self {
            config,
            backend,
            credentials,
            session,
            throttle,
        }
    }

    /// The credential store used for protected calls.
    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// The bus session-end notifications are published on.
    #[must_use]
    pub fn session_bus(&self) -> &SessionBus {
        &self.session
    }

    /// Sends `request` and returns its 2xx response.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AuthRequired`] when a protected call has no credential.
    /// - [`ClientError::AuthExpired`] on a failed refresh or a 401.
    /// - [`ClientError::Request`] for network errors, timeouts and non-2xx
    ///   statuses, after the retry when one applies.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut retry = RetryContext::for_mode(request.retry);
        loop {
            retry.begin();
            match self.attempt(&request).await {
                Ok(response) => return Ok(response),
                Err(err) if retry.should_retry(&err) => {
                    tracing::warn!(
                        method = %request.method,
                        path = %request.path,
                        attempt = retry.attempt,
                        delay_ms = self.config.retry_backoff.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(err) => {
                    tracing::debug!(
                        method = %request.method,
                        path = %request.path,
                        attempt = retry.attempt,
                        code = err.error_code(),
                        error = %err,
                        "request failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// [`RequestClient::send`] and deserialize the body.
    ///
    /// # Errors
    ///
    /// As [`RequestClient::send`], plus [`ClientError::Protocol`] when the
    /// body does not match `T`.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        self.send(request).await?.json()
    }

    async fn attempt(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        self.throttle.acquire().await;
        let bearer = match request.access {
            Access::Public => None,
            Access::Protected => Some(self.bearer(&request.path).await?),
        };

        let timeout = request.timeout.unwrap_or(self.config.timeout);
        let response = tokio::time::timeout(
            timeout,
            self.backend.execute(request, bearer.as_deref(), timeout),
        )
        .await
        .map_err(|_| {
            ClientError::network(format!(
                "{} {} timed out after {}ms",
                request.method,
                request.path,
                timeout.as_millis()
            ))
        })??;

        if response.is_success() {
            return Ok(response);
        }
        if response.status == 401 && request.access == Access::Protected {
            self.end_session(SessionEndReason::Unauthorized, &request.path);
            return Err(ClientError::AuthExpired);
        }
        Err(ClientError::from_status(
            response.status,
            response.error_message(),
        ))
    }

    /// Current credential, refreshed first when expired.
    async fn bearer(&self, path: &str) -> Result<String, ClientError> {
        let Some(token) = self.credentials.token() else {
            return Err(ClientError::AuthRequired);
        };
        if !self.credentials.is_expired() {
            return Ok(token);
        }
        match self.credentials.refresh().await {
            Ok(token) => Ok(token),
            Err(err) => {
                tracing::warn!(path, error = %err, "credential refresh failed");
                self.end_session(SessionEndReason::RefreshFailed, path);
                Err(ClientError::AuthExpired)
            }
        }
    }

    fn end_session(&self, reason: SessionEndReason, path: &str) {
        self.credentials.clear();
        self.session.session_ended(reason, Some(path));
    }
}
