//! HTTP transport seam.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::request::{ApiRequest, ApiResponse};
use crate::error::ClientError;

/// Executes one HTTP exchange.
///
/// Implementations return `Err` only when no response was received
/// (connection failure, timeout); every received response, including 4xx
/// and 5xx, is `Ok`.
#[async_trait]
pub trait HttpBackend: Send + Sync + std::fmt::Debug {
    /// Sends `request`, with `bearer` as the credential when present.
    ///
    /// # Errors
    ///
    /// Returns a network-kind [`ClientError::Request`] when no response
    /// arrived within `timeout`.
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> Result<ApiResponse, ClientError>;
}

/// Production backend on `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: Client,
    base_url: String,
}

impl ReqwestBackend {
    /// Creates a backend for `base_url` (no trailing slash needed).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
        timeout: Duration,
    ) -> Result<ApiResponse, ClientError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::network(format!("{} {} timed out", request.method, request.path))
            } else {
                ClientError::network(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::network(format!("reading response body: {e}")))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse { status, body })
    }
}
