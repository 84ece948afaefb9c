//! Credential storage boundary.
//!
//! The request and connection layers only see [`CredentialStore`].
//! [`TokenStore`] is the in-memory implementation: it keeps the bearer
//! token, the refresh token and the user id, judges expiry by time since
//! issue, and refreshes through the data API.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;

use super::backend::HttpBackend;
use super::request::ApiRequest;
use crate::error::ClientError;

/// Path of the credential refresh call.
pub const REFRESH_PATH: &str = "/auth/refresh-token";

/// Source of the bearer credential.
#[async_trait]
pub trait CredentialStore: Send + Sync + fmt::Debug {
    /// Current bearer token, if any.
    fn token(&self) -> Option<String>;

    /// `true` when the token is missing or past its lifetime.
    fn is_expired(&self) -> bool;

    /// Obtains a new token and stores it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AuthExpired`] when no refresh is possible, or
    /// the error of the refresh call.
    async fn refresh(&self) -> Result<String, ClientError>;

    /// Forgets every credential.
    fn clear(&self);

    /// Stores the credential carried by a login or register response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] when the response carries no
    /// usable credential.
    fn store_from_response(&self, body: &Value) -> Result<(), ClientError>;

    /// Id of the logged-in user, if known.
    fn user_id(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
struct Credentials {
    token: String,
    refresh_token: Option<String>,
    user_id: Option<String>,
    issued_at: Instant,
}

/// In-memory [`CredentialStore`].
pub struct TokenStore {
    lifetime: Duration,
    state: Mutex<Option<Credentials>>,
    refresher: Option<Arc<dyn HttpBackend>>,
    refresh_timeout: Duration,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("lifetime", &self.lifetime)
            .field("has_token", &self.token().is_some())
            .field("can_refresh", &self.refresher.is_some())
            .finish()
    }
}

impl TokenStore {
    /// Empty store whose tokens live for `lifetime`.
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            state: Mutex::new(None),
            refresher: None,
            refresh_timeout: Duration::from_secs(15),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Enables [`CredentialStore::refresh`] through `backend`.
    #[must_use]
    pub fn with_refresh_backend(mut self, backend: Arc<dyn HttpBackend>, timeout: Duration) -> Self {
        self.refresher = Some(backend);
        self.refresh_timeout = timeout;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Credentials>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a freshly issued credential.
    pub fn store(&self, token: &str, refresh_token: Option<&str>, user_id: Option<&str>) {
        *self.lock() = Some(Credentials {
            token: token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            user_id: user_id.map(str::to_string),
            issued_at: Instant::now(),
        });
    }

    fn replace_token(&self, token: &str, refresh_token: Option<&str>) {
        if let Some(credentials) = self.lock().as_mut() {
            credentials.token = token.to_string();
            if let Some(refresh) = refresh_token {
                credentials.refresh_token = Some(refresh.to_string());
            }
            credentials.issued_at = Instant::now();
        }
    }
}

#[async_trait]
impl CredentialStore for TokenStore {
    fn token(&self) -> Option<String> {
        self.lock().as_ref().map(|c| c.token.clone())
    }

    fn is_expired(&self) -> bool {
        self.lock()
            .as_ref()
            .is_none_or(|c| c.issued_at.elapsed() > self.lifetime)
    }

    async fn refresh(&self) -> Result<String, ClientError> {
        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if !self.is_expired() {
            if let Some(token) = self.token() {
                return Ok(token);
            }
        }
        let refresh_token = self
            .lock()
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
            .ok_or(ClientError::AuthExpired)?;
        let backend = self.refresher.as_ref().ok_or(ClientError::AuthExpired)?;

        let request = ApiRequest::post(REFRESH_PATH)
            .public()
            .no_retry()
            .json(json!({ "refreshToken": refresh_token }));
        let response = backend
            .execute(&request, None, self.refresh_timeout)
            .await?;
        if !response.is_success() {
            tracing::warn!(status = response.status, "credential refresh rejected");
            return Err(ClientError::AuthExpired);
        }
        let token = response
            .body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol("refresh response has no `token` field".into()))?;
        let rotated = response.body.get("refreshToken").and_then(Value::as_str);
        self.replace_token(token, rotated);
        tracing::info!("credential refreshed");
        Ok(token.to_string())
    }

    fn clear(&self) {
        *self.lock() = None;
    }

    fn store_from_response(&self, body: &Value) -> Result<(), ClientError> {
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol("auth response has no `token` field".into()))?;
        let refresh = body.get("refreshToken").and_then(Value::as_str);
        let user_id = body.get("userId").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        self.store(token, refresh, user_id.as_deref());
        Ok(())
    }

    fn user_id(&self) -> Option<String> {
        self.lock().as_ref().and_then(|c| c.user_id.clone())
    }
}
