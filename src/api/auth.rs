//! Login, registration and logout.

use serde_json::Value;

use super::dto::{LoginRequest, UserIdBody};
use super::{ChatApi, to_body};
use crate::error::ClientError;
use crate::events::SessionEndReason;
use crate::http::ApiRequest;

impl ChatApi {
    /// Logs in and stores the returned credential.
    ///
    /// Public and never retried.
    ///
    /// # Errors
    ///
    /// The request failure (a 401 here is a plain client error, not a
    /// session end), or [`ClientError::Protocol`] when the response has no
    /// `token`.
    pub async fn login(&self, email: &str, password: &str) -> Result<Value, ClientError> {
        let body = to_body(&LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        })?;
        let request = ApiRequest::post("/auth/login").json(body).public().no_retry();
        self.authenticate(request).await
    }

    /// Registers an account and stores the returned credential.
    ///
    /// # Errors
    ///
    /// As [`ChatApi::login`].
    pub async fn register(&self, account: Value) -> Result<Value, ClientError> {
        let request = ApiRequest::post("/auth/register").json(account).public().no_retry();
        self.authenticate(request).await
    }

    async fn authenticate(&self, request: ApiRequest) -> Result<Value, ClientError> {
        let path = request.path.clone();
        let response = self.client.send(request).await?;
        self.client.credentials().store_from_response(&response.body)?;
        tracing::info!(path, user_id = ?self.client.credentials().user_id(), "authenticated");
        Ok(response.body)
    }

    /// The logged-in user's profile.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn current_user(&self) -> Result<Value, ClientError> {
        Ok(self.client.send(ApiRequest::get("/auth/me")).await?.body)
    }

    /// Logs out.
    ///
    /// The server is told when the user id is known; local state (the
    /// credential and the page cache) is cleared and
    /// [`SessionEndReason::LoggedOut`] published whatever the server says.
    ///
    /// # Errors
    ///
    /// The logout call's failure, after local state was cleared.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let credentials = self.client.credentials();
        let result = async {
            let Some(user_id) = credentials.user_id() else {
                return Ok(());
            };
            let body = to_body(&UserIdBody { user_id })?;
            let request = ApiRequest::post("/auth/logout").json(body).no_retry();
            self.client.send(request).await.map(|_| ())
        }
        .await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "logout call failed; clearing local session anyway");
        }
        credentials.clear();
        self.cache.clear();
        self.client
            .session_bus()
            .session_ended(SessionEndReason::LoggedOut, None);
        result
    }
}
