//! Notification operations.

use serde_json::Value;

use super::dto::PageParams;
use super::{ChatApi, require};
use crate::error::ClientError;
use crate::http::ApiRequest;

impl ChatApi {
    /// Lists notifications of `user_id`, optionally only unread ones.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn list_notifications(
        &self,
        user_id: &str,
        page: PageParams,
        unread_only: bool,
    ) -> Result<Value, ClientError> {
        require("user id", user_id)?;
        let request = ApiRequest::get("/notifications")
            .query("userId", user_id)
            .query("page", page.page)
            .query("size", page.size)
            .query("unreadOnly", unread_only);
        Ok(self.client.send(request).await?.body)
    }

    /// Unread notification count of `user_id`.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn notification_count(&self, user_id: &str) -> Result<Value, ClientError> {
        require("user id", user_id)?;
        let request = ApiRequest::get("/notifications/count").query("userId", user_id);
        Ok(self.client.send(request).await?.body)
    }

    /// Marks one notification read.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn mark_notification_read(&self, notification_id: &str) -> Result<Value, ClientError> {
        require("notification id", notification_id)?;
        let request = ApiRequest::put(format!("/notifications/{notification_id}/read"));
        Ok(self.client.send(request).await?.body)
    }

    /// Marks every notification of `user_id` read.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn mark_all_notifications_read(&self, user_id: &str) -> Result<Value, ClientError> {
        require("user id", user_id)?;
        let request = ApiRequest::put("/notifications/read-all").query("userId", user_id);
        Ok(self.client.send(request).await?.body)
    }
}
