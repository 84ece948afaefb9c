//! Conversation operations.

use serde_json::Value;

use super::dto::PageParams;
use super::{ChatApi, require};
use crate::error::ClientError;
use crate::http::ApiRequest;

impl ChatApi {
    /// Lists the conversations of `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn list_conversations(&self, user_id: &str, page: PageParams) -> Result<Value, ClientError> {
        require("user id", user_id)?;
        let request = ApiRequest::get("/conversations")
            .query("userId", user_id)
            .query("page", page.page)
            .query("size", page.size);
        Ok(self.client.send(request).await?.body)
    }

    /// Fetches one conversation.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidRequest`] for an empty id or the `"new"`
    /// placeholder, without any request; otherwise request failures.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Value, ClientError> {
        if conversation_id.trim().is_empty() || conversation_id == "new" {
            return Err(ClientError::InvalidRequest(format!(
                "`{conversation_id}` is not a conversation id; create the conversation first"
            )));
        }
        let request = ApiRequest::get(format!("/conversations/{conversation_id}"));
        Ok(self.client.send(request).await?.body)
    }

    /// Creates a conversation from an opaque description.
    ///
    /// Not retried by the request layer: a lost response could otherwise
    /// create the conversation twice.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn create_conversation(&self, conversation: Value) -> Result<Value, ClientError> {
        let request = ApiRequest::post("/conversations").json(conversation).no_retry();
        Ok(self.client.send(request).await?.body)
    }

    /// Updates conversation metadata.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn update_conversation(&self, conversation_id: &str, changes: Value) -> Result<Value, ClientError> {
        require("conversation id", conversation_id)?;
        let request = ApiRequest::put(format!("/conversations/{conversation_id}")).json(changes);
        Ok(self.client.send(request).await?.body)
    }

    /// Updates the caller's per-conversation settings (muted, pinned).
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn update_conversation_settings(
        &self,
        conversation_id: &str,
        settings: Value,
    ) -> Result<Value, ClientError> {
        require("conversation id", conversation_id)?;
        let request = ApiRequest::put(format!("/user-conversations/{conversation_id}")).json(settings);
        Ok(self.client.send(request).await?.body)
    }

    /// Deletes (or leaves) a conversation for `user_id` and drops its
    /// cached pages.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn delete_conversation(&self, conversation_id: &str, user_id: &str) -> Result<Value, ClientError> {
        require("conversation id", conversation_id)?;
        let request =
            ApiRequest::delete(format!("/conversations/{conversation_id}")).query("userId", user_id);
        let response = self.client.send(request).await?;
        self.cache.invalidate_resource(conversation_id);
        Ok(response.body)
    }
}
