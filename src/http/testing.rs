//! Scripted [`HttpBackend`] used by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::time::Instant;

use super::backend::HttpBackend;
use super::request::{ApiRequest, ApiResponse};
use crate::error::ClientError;

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<Value>,
    pub(crate) bearer: Option<String>,
    pub(crate) at: Instant,
}

impl RecordedCall {
    pub(crate) fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Response(ApiResponse),
    NetworkError,
}

#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<ApiResponse>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBackend {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn clone_dyn(self: &Arc<Self>) -> Arc<dyn HttpBackend> {
        Arc::clone(self) as Arc<dyn HttpBackend>
    }

    /// Queues one response.
    pub(crate) fn respond(&self, status: u16, body: Value) {
        lock(&self.script).push_back(Reply::Response(ApiResponse { status, body }));
    }

    /// Queues one connection failure.
    pub(crate) fn fail_network(&self) {
        lock(&self.script).push_back(Reply::NetworkError);
    }

    /// Response used once the script is empty (default: `200 null`).
    pub(crate) fn always(&self, status: u16, body: Value) {
        *lock(&self.fallback) = Some(ApiResponse { status, body });
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl HttpBackend for MockBackend {
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
        _timeout: Duration,
    ) -> Result<ApiResponse, ClientError> {
        lock(&self.calls).push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
            bearer: bearer.map(str::to_string),
            at: Instant::now(),
        });
        let reply = lock(&self.script).pop_front();
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match reply {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::NetworkError) => Err(ClientError::network("connection refused")),
            None => Ok(lock(&self.fallback).clone().unwrap_or(ApiResponse {
                status: 200,
                body: Value::Null,
            })),
        }
    }
}
