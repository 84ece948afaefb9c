//! Message history, message writes and read state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::dto::{EditMessageRequest, MessageQuery, UserIdBody};
use super::{ChatApi, require, to_body};
use crate::cache::{CacheKey, ResourceClass};
use crate::error::ClientError;
use crate::http::{ApiRequest, with_retries};

/// Waits before the retries of a message send.
const SEND_RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Waits before the retries of a read-state update.
const READ_STATE_RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];

impl ChatApi {
    /// Fetches one page of a conversation's messages through the cache.
    ///
    /// The page size is clamped to the conversation class maximum and the
    /// fetch uses the class timeout. Concurrent reads of the same page
    /// share one request; a page in the second half of its TTL is returned
    /// immediately and refreshed in the background.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidRequest`] for an empty id; otherwise the fetch
    /// error when no cached page can stand in for it.
    pub async fn fetch_messages(
        &self,
        conversation_id: &str,
        query: MessageQuery,
    ) -> Result<Value, ClientError> {
        require("conversation id", conversation_id)?;
        let policy = self.policy.policy(ResourceClass::of(conversation_id));
        let size = policy.clamp_page_size(query.size);
        let key = CacheKey::messages(conversation_id, query.page, size, query.before.as_deref());
        if query.force_refresh {
            self.cache.invalidate_key(&key);
        }

        let request = ApiRequest::get(format!("/conversations/{conversation_id}/messages"))
            .query("page", query.page)
            .query("size", size)
            .query_opt("before", query.before.as_deref())
            .timeout(policy.timeout);
        let client = Arc::clone(&self.client);
        self.cache
            .get_or_fetch(&key, policy.ttl, move || async move {
                client.send(request).await.map(|response| response.body)
            })
            .await
    }

    /// Posts a message, retrying network and 5xx failures twice (after 1s
    /// and 2s), then drops the conversation's cached pages.
    ///
    /// # Errors
    ///
    /// The last failure once retries are exhausted, or the first failure
    /// that is not retryable.
    pub async fn send_message(&self, conversation_id: &str, message: Value) -> Result<Value, ClientError> {
        require("conversation id", conversation_id)?;
        let path = format!("/conversations/{conversation_id}/messages");
        let client = self.client.as_ref();
        let response = with_retries("send_message", &SEND_RETRY_DELAYS, move || {
            client.send(ApiRequest::post(path.clone()).json(message.clone()).no_retry())
        })
        .await?;
        self.cache.invalidate_resource(conversation_id);
        Ok(response.body)
    }

    /// Replaces a message's text.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Value, ClientError> {
        require("message id", message_id)?;
        let body = to_body(&EditMessageRequest {
            content: content.to_string(),
        })?;
        let response = self
            .client
            .send(ApiRequest::put(format!("/messages/{message_id}")).json(body))
            .await?;
        self.cache.invalidate_resource(conversation_id);
        Ok(response.body)
    }

    /// Deletes a message.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<Value, ClientError> {
        require("message id", message_id)?;
        let response = self
            .client
            .send(ApiRequest::delete(format!("/messages/{message_id}")))
            .await?;
        self.cache.invalidate_resource(conversation_id);
        Ok(response.body)
    }

    /// Marks one message read.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn mark_message_read(&self, message_id: &str) -> Result<Value, ClientError> {
        require("message id", message_id)?;
        let response = self
            .client
            .send(ApiRequest::put(format!("/messages/{message_id}/read")))
            .await?;
        Ok(response.body)
    }

    /// Marks a conversation read for `user_id`, retrying twice (after 1s
    /// and 3s).
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidRequest`] for an empty id; otherwise the last
    /// request failure.
    pub async fn mark_conversation_read(&self, conversation_id: &str, user_id: &str) -> Result<Value, ClientError> {
        self.update_read_state(
            "mark_conversation_read",
            format!("/user-conversations/{conversation_id}/read"),
            conversation_id,
            user_id,
        )
        .await
    }

    /// Marks every message of a conversation read for `user_id`, retrying
    /// twice (after 1s and 3s).
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidRequest`] for an empty id; otherwise the last
    /// request failure.
    pub async fn mark_all_messages_read(&self, conversation_id: &str, user_id: &str) -> Result<Value, ClientError> {
        self.update_read_state(
            "mark_all_messages_read",
            format!("/messages/mark-all-read/{conversation_id}"),
            conversation_id,
            user_id,
        )
        .await
    }

    async fn update_read_state(
        &self,
        operation: &str,
        path: String,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Value, ClientError> {
        require("conversation id", conversation_id)?;
        require("user id", user_id)?;
        let body = to_body(&UserIdBody {
            user_id: user_id.to_string(),
        })?;
        let client = self.client.as_ref();
        let response = with_retries(operation, &READ_STATE_RETRY_DELAYS, move || {
            client.send(ApiRequest::put(path.clone()).json(body.clone()).no_retry())
        })
        .await?;
        Ok(response.body)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use reqwest::Method;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::api::testing::harness;
    use crate::cache::Lookup;

    #[tokio::test(start_paused = true)]
    async fn repeated_reads_hit_the_cache() {
        let h = harness();
        h.backend.respond(200, json!([{"id": "m1"}]));

        let first = h.api.fetch_messages("c1", MessageQuery::first_page()).await;
        let second = h.api.fetch_messages("c1", MessageQuery::first_page()).await;
        assert_eq!(first, Ok(json!([{"id": "m1"}])));
        assert_eq!(second, first);
        assert_eq!(h.backend.call_count(), 1);

        let calls = h.backend.calls();
        let Some(call) = calls.first() else {
            panic!("expected a call");
        };
        assert_eq!(call.path, "/conversations/c1/messages");
        assert_eq!(call.query_value("page"), Some("0"));
        assert_eq!(call.query_value("size"), Some("50"));
        assert_eq!(call.query_value("before"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_are_coalesced() {
        let h = harness();
        h.backend.set_latency(Duration::from_millis(300));
        let (a, b) = tokio::join!(
            h.api.fetch_messages("c1", MessageQuery::first_page()),
            h.api.fetch_messages("c1", MessageQuery::first_page()),
        );
        assert!(a.is_ok());
        assert_eq!(a, b);
        assert_eq!(h.backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn group_page_size_is_clamped() {
        let h = harness();
        let query = MessageQuery::page(1).size(100).before("2024-05-01T00:00:00Z");
        assert!(h.api.fetch_messages("group_7", query).await.is_ok());
        let calls = h.backend.calls();
        let Some(call) = calls.first() else {
            panic!("expected a call");
        };
        assert_eq!(call.query_value("size"), Some("40"));
        assert_eq!(call.query_value("before"), Some("2024-05-01T00:00:00Z"));
        let key = CacheKey::messages("group_7", 1, 40, Some("2024-05-01T00:00:00Z"));
        assert!(matches!(h.api.cache().lookup(&key), Lookup::Fresh(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_bypasses_the_cache() {
        let h = harness();
        assert!(h.api.fetch_messages("c1", MessageQuery::first_page()).await.is_ok());
        assert!(
            h.api
                .fetch_messages("c1", MessageQuery::first_page().force_refresh())
                .await
                .is_ok()
        );
        assert_eq!(h.backend.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_invalidates_the_conversation() {
        let h = harness();
        assert!(h.api.fetch_messages("c1", MessageQuery::first_page()).await.is_ok());
        assert!(h.api.fetch_messages("c2", MessageQuery::first_page()).await.is_ok());

        let sent = h.api.send_message("c1", json!({"content": "hi"})).await;
        assert!(sent.is_ok());
        let page0 = CacheKey::messages("c1", 0, 50, None);
        assert_eq!(h.api.cache().lookup(&page0), Lookup::Miss);
        assert_eq!(h.api.cache().len(), 1);

        assert!(h.api.fetch_messages("c1", MessageQuery::first_page()).await.is_ok());
        let calls = h.backend.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls.get(2).map(|c| c.method.clone()), Some(Method::POST));
        assert_eq!(
            calls.get(2).and_then(|c| c.body.clone()),
            Some(json!({"content": "hi"}))
        );
        assert_eq!(calls.get(3).map(|c| c.method.clone()), Some(Method::GET));
    }

    #[tokio::test(start_paused = true)]
    async fn send_retries_twice_with_growing_delay() {
        let h = harness();
        h.backend.fail_network();
        h.backend.fail_network();
        h.backend.respond(201, json!({"id": "m9"}));

        let start = Instant::now();
        let sent = h.api.send_message("c1", json!({"content": "hi"})).await;
        assert_eq!(sent, Ok(json!({"id": "m9"})));
        assert_eq!(h.backend.call_count(), 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn send_gives_up_after_three_attempts() {
        let h = harness();
        h.backend.always(500, json!({"message": "down"}));
        let sent = h.api.send_message("c1", json!({"content": "hi"})).await;
        assert_eq!(sent.err().and_then(|e| e.status()), Some(500));
        assert_eq!(h.backend.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn send_does_not_retry_client_errors() {
        let h = harness();
        h.backend.respond(400, json!({"message": "empty message"}));
        let sent = h.api.send_message("c1", json!({})).await;
        assert_eq!(sent.err().and_then(|e| e.status()), Some(400));
        assert_eq!(h.backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_page_falls_back_on_error() {
        let h = harness();
        h.backend.respond(200, json!(["old"]));
        assert!(h.api.fetch_messages("c1", MessageQuery::first_page()).await.is_ok());

        tokio::time::sleep(Duration::from_secs(61)).await;
        h.backend.always(503, json!({}));
        let page = h.api.fetch_messages("c1", MessageQuery::first_page()).await;
        assert_eq!(page, Ok(json!(["old"])));
    }

    #[tokio::test(start_paused = true)]
    async fn edit_and_delete_invalidate_owning_conversation() {
        let h = harness();
        assert!(h.api.fetch_messages("c1", MessageQuery::first_page()).await.is_ok());
        assert!(h.api.edit_message("c1", "m1", "fixed").await.is_ok());
        assert!(h.api.cache().is_empty());

        assert!(h.api.fetch_messages("c1", MessageQuery::first_page()).await.is_ok());
        assert!(h.api.delete_message("c1", "m1").await.is_ok());
        assert!(h.api.cache().is_empty());

        let calls = h.backend.calls();
        let edit = calls.get(1);
        assert_eq!(edit.map(|c| c.path.as_str()), Some("/messages/m1"));
        assert_eq!(edit.and_then(|c| c.body.clone()), Some(json!({"content": "fixed"})));
        assert_eq!(calls.get(3).map(|c| c.method.clone()), Some(Method::DELETE));
    }

    #[tokio::test(start_paused = true)]
    async fn read_state_retries_with_one_and_three_seconds() {
        let h = harness();
        h.backend.always(503, json!({}));
        let start = Instant::now();
        let result = h.api.mark_conversation_read("c1", "u1").await;
        assert!(result.is_err());
        assert_eq!(h.backend.call_count(), 3);
        assert!(start.elapsed() >= Duration::from_secs(4));

        let calls = h.backend.calls();
        assert!(calls.iter().all(|c| c.path == "/user-conversations/c1/read"));
        assert_eq!(calls.first().and_then(|c| c.body.clone()), Some(json!({"userId": "u1"})));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_all_read_path_and_validation() {
        let h = harness();
        assert!(h.api.mark_all_messages_read("c1", "u1").await.is_ok());
        assert!(matches!(
            h.api.mark_all_messages_read("c1", "").await,
            Err(ClientError::InvalidRequest(_))
        ));
        assert!(h.api.mark_message_read("m3").await.is_ok());
        let calls = h.backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls.first().map(|c| c.path.as_str()), Some("/messages/mark-all-read/c1"));
        assert_eq!(calls.get(1).map(|c| c.path.as_str()), Some("/messages/m3/read"));
    }
}
