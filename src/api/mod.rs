//! Chat data operations.
//!
//! [`ChatApi`] is what application code calls for everything that is not
//! real-time: message history (served through the [`ResponseCache`]),
//! message writes, read state, conversations, notifications and login.
//! Every call goes through the shared [`RequestClient`], so credential
//! handling, throttling and the single idempotent retry apply uniformly.
//!
//! Writes scoped to a conversation drop that conversation's cached pages
//! once they succeed.

pub mod dto;

mod auth;
mod conversations;
mod messages;
mod notifications;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::cache::ResponseCache;
use crate::config::CacheConfig;
use crate::error::ClientError;
use crate::http::RequestClient;

pub use dto::*;

/// Chat data API over a [`RequestClient`] and a message-page cache.
pub struct ChatApi {
    client: Arc<RequestClient>,
    cache: ResponseCache<Value>,
    policy: CacheConfig,
}

impl fmt::Debug for ChatApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatApi")
            .field("cache", &self.cache)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ChatApi {
    /// Creates the API with an empty cache.
    #[must_use]
    pub fn new(client: Arc<RequestClient>, policy: CacheConfig) -> Self {
        Self {
            client,
            cache: ResponseCache::new(),
            policy,
        }
    }

    /// The message-page cache.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache<Value> {
        &self.cache
    }

    /// The underlying request client.
    #[must_use]
    pub fn request_client(&self) -> &Arc<RequestClient> {
        &self.client
    }

    /// Drops every cached page of `conversation_id`.
    pub fn invalidate_conversation(&self, conversation_id: &str) -> usize {
        self.cache.invalidate_resource(conversation_id)
    }
}

pub(crate) fn to_body<T: Serialize>(value: &T) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|e| ClientError::InvalidRequest(e.to_string()))
}

fn require(name: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::InvalidRequest(format!("{name} is required")));
    }
    Ok(())
}
