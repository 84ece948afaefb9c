//! The client façade.
//!
//! [`ChatClient`] builds every component from one [`ClientConfig`] and
//! shares the credential store between the persistent connection and the
//! data API. It also closes the connection when the request layer ends
//! the session, so a rejected credential is not kept alive on the socket.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::api::dto::{BulkReadReceipt, ReadReceipt, TypingStatus};
use crate::api::{ChatApi, to_body};
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::ClientError;
use crate::events::{EventDispatcher, SessionBus, SessionEvent};
use crate::http::{CredentialStore, HttpBackend, RequestClient, ReqwestBackend, TokenStore};
use crate::transport::{Connector, Payload, SubscriptionHandle, WsConnector, destinations};

/// Real-time connection plus cached data API for one user session.
pub struct ChatClient {
    credentials: Arc<TokenStore>,
    connection: ConnectionManager,
    api: ChatApi,
    session: SessionBus,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("connection", &self.connection)
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Builds a client talking to the configured backend over websockets
    /// and `reqwest`.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let backend: Arc<dyn HttpBackend> =
            Arc::new(ReqwestBackend::new(config.request.base_url.clone()));
        let credentials = Arc::new(
            TokenStore::new(config.request.credential_lifetime)
                .with_refresh_backend(Arc::clone(&backend), config.request.timeout),
        );
        let connector: Arc<dyn Connector> =
            Arc::new(WsConnector::new(config.connection.endpoint.clone()));
        Self::with_parts(config, connector, backend, credentials)
    }

    /// Builds a client over caller-supplied transport and HTTP backends.
    ///
    /// The session watcher is only started when called inside a Tokio
    /// runtime.
    #[must_use]
    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn HttpBackend>,
        credentials: Arc<TokenStore>,
    ) -> Self {
        let session = SessionBus::new(config.session_bus_capacity);
        let store: Arc<dyn CredentialStore> = Arc::clone(&credentials) as Arc<dyn CredentialStore>;
        let connection = ConnectionManager::new(
            config.connection,
            connector,
            Arc::clone(&store),
            EventDispatcher::new(),
        );
        let request = RequestClient::new(config.request, backend, store, session.clone());
        let api = ChatApi::new(Arc::new(request), config.cache);

        let watcher = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(watch_session(session.subscribe(), connection.clone()))),
            Err(_) => {
                tracing::warn!("no tokio runtime; session end will not close the connection");
                None
            }
        };

        Self {
            credentials,
            connection,
            api,
            session,
            watcher: Mutex::new(watcher),
        }
    }

    /// The persistent connection.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The data API.
    #[must_use]
    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    /// Lifecycle event listeners.
    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        self.connection.events()
    }

    /// Session-ended notifications.
    #[must_use]
    pub fn session_bus(&self) -> &SessionBus {
        &self.session
    }

    /// The shared credential store.
    #[must_use]
    pub fn credentials(&self) -> &Arc<TokenStore> {
        &self.credentials
    }

    /// Logs in over the data API, then opens the persistent connection.
    ///
    /// # Errors
    ///
    /// The login failure, or the first connect failure (a reconnect is
    /// then already scheduled).
    pub async fn login(&self, email: &str, password: &str) -> Result<Value, ClientError> {
        let user = self.api.login(email, password).await?;
        self.connection.connect().await?;
        Ok(user)
    }

    /// Opens the persistent connection with the stored credential.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connection.connect().await
    }

    /// Subscribes to a conversation's event topic.
    pub fn subscribe_to_conversation<F>(&self, conversation_id: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.connection
            .subscribe(&destinations::conversation(conversation_id), handler)
    }

    /// Drops the subscription to a conversation's topic.
    pub fn unsubscribe_from_conversation(&self, conversation_id: &str) -> bool {
        self.connection
            .unsubscribe(&destinations::conversation(conversation_id))
    }

    /// Subscribes to the user's notification queue.
    pub fn subscribe_to_notifications<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.connection.subscribe(destinations::NOTIFICATIONS, handler)
    }

    /// Publishes the user's typing status in a conversation.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::publish`].
    pub async fn send_typing_status(&self, conversation_id: &str, is_typing: bool) -> Result<(), ClientError> {
        let body = to_body(&TypingStatus {
            conversation_id: conversation_id.to_string(),
            user_id: self.credentials.user_id(),
            is_typing,
        })?;
        self.connection
            .publish(&destinations::typing(conversation_id), &body)
            .await
    }

    /// Publishes a read receipt for one message.
    ///
    /// # Errors
    ///
    /// [`ClientError::AuthRequired`] when the user id is unknown; otherwise
    /// see [`ConnectionManager::publish`].
    pub async fn send_read_receipt(&self, conversation_id: &str, message_id: &str) -> Result<(), ClientError> {
        let user_id = self.credentials.user_id().ok_or(ClientError::AuthRequired)?;
        let body = to_body(&ReadReceipt {
            message_id: message_id.to_string(),
            user_id,
            timestamp: Utc::now(),
        })?;
        self.connection
            .publish(&destinations::read_receipt(conversation_id), &body)
            .await
    }

    /// Publishes one read receipt covering several messages.
    ///
    /// # Errors
    ///
    /// As [`ChatClient::send_read_receipt`]; an empty id list is
    /// [`ClientError::InvalidRequest`].
    pub async fn send_bulk_read_receipt(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> Result<(), ClientError> {
        if message_ids.is_empty() {
            return Err(ClientError::InvalidRequest("no message ids".into()));
        }
        let user_id = self.credentials.user_id().ok_or(ClientError::AuthRequired)?;
        let body = to_body(&BulkReadReceipt {
            message_ids: message_ids.to_vec(),
            user_id,
        })?;
        self.connection
            .publish(&destinations::bulk_read_receipt(conversation_id), &body)
            .await
    }

    /// Logs out: closes the connection and clears the session.
    ///
    /// # Errors
    ///
    /// See [`ChatApi::logout`]; the connection is closed regardless.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.connection.disconnect();
        self.api.logout().await
    }

    /// Closes the connection, drops all listeners and subscriptions, and
    /// stops the session watcher. In-flight HTTP calls are left to finish.
    pub fn shutdown(&self) {
        if let Some(watcher) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
        self.connection.shutdown();
        self.api.cache().clear();
        tracing::info!("client shut down");
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(watcher) = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watcher.abort();
        }
    }
}

/// Closes the connection whenever the session ends.
async fn watch_session(mut rx: broadcast::Receiver<SessionEvent>, connection: ConnectionManager) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::Ended { reason, .. }) => {
                tracing::info!(?reason, "session ended; closing connection");
                connection.disconnect();
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session watcher lagged");
                connection.disconnect();
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::connection::ConnectionState;
    use crate::events::EventChannel;
    use crate::http::testing::MockBackend;
    use crate::transport::Command;
    use crate::transport::testing::{MockConnector, MockLink};

    struct Harness {
        client: ChatClient,
        connector: Arc<MockConnector>,
        backend: Arc<MockBackend>,
    }

    fn harness() -> Harness {
        let connector = MockConnector::new();
        let backend = MockBackend::new();
        let credentials = Arc::new(TokenStore::new(Duration::from_secs(3600)));
        credentials.store("tok", None, Some("u1"));
        let client = ChatClient::with_parts(
            ClientConfig::default(),
            Arc::clone(&connector) as Arc<dyn Connector>,
            backend.clone_dyn(),
            credentials,
        );
        Harness {
            client,
            connector,
            backend,
        }
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn link(h: &Harness) -> MockLink {
        let Some(link) = h.connector.last_link() else {
            panic!("no transport opened");
        };
        link
    }

    #[tokio::test(start_paused = true)]
    async fn subscriptions_made_before_connect_are_sent() {
        let h = harness();
        let conversation = h.client.subscribe_to_conversation("c1", |_| {});
        let notifications = h.client.subscribe_to_notifications(|_| {});
        assert!(!conversation.is_active());
        assert!(!notifications.is_active());

        assert_eq!(h.client.connect().await, Ok(()));
        assert_eq!(
            link(&h).subscribed(),
            vec!["/topic/conversations/c1", "/user/queue/notifications"]
        );
        assert!(h.client.unsubscribe_from_conversation("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn typing_and_receipts_are_published() {
        let h = harness();
        assert_eq!(h.client.send_typing_status("c1", true).await, Ok(()));
        assert_eq!(h.client.send_read_receipt("c1", "m1").await, Ok(()));
        let ids = vec!["m1".to_string(), "m2".to_string()];
        assert_eq!(h.client.send_bulk_read_receipt("c1", &ids).await, Ok(()));
        settle().await;

        let sends: Vec<_> = link(&h)
            .sent()
            .into_iter()
            .filter(|f| f.command == Command::Send)
            .collect();
        assert_eq!(sends.len(), 3);

        let typing = sends.first();
        assert_eq!(
            typing.and_then(|f| f.get("destination")),
            Some("/app/conversations/c1/typing")
        );
        let body: Option<Value> = typing.and_then(|f| serde_json::from_str(&f.body).ok());
        assert_eq!(
            body,
            Some(json!({"conversationId": "c1", "userId": "u1", "isTyping": true}))
        );

        let receipt: Option<Value> = sends.get(1).and_then(|f| serde_json::from_str(&f.body).ok());
        assert_eq!(
            receipt.as_ref().and_then(|r| r.get("messageId")),
            Some(&json!("m1"))
        );
        assert!(receipt.as_ref().and_then(|r| r.get("timestamp")).is_some());
        assert_eq!(
            sends.get(2).and_then(|f| f.get("destination")),
            Some("/app/chat/c1/read-bulk")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn receipts_need_a_user_and_ids() {
        let h = harness();
        assert!(matches!(
            h.client.send_bulk_read_receipt("c1", &[]).await,
            Err(ClientError::InvalidRequest(_))
        ));
        h.client.credentials().clear();
        assert_eq!(
            h.client.send_read_receipt("c1", "m1").await,
            Err(ClientError::AuthRequired)
        );
        assert_eq!(h.connector.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_credential_closes_the_connection() {
        let h = harness();
        assert_eq!(h.client.connect().await, Ok(()));
        h.backend.respond(401, json!({}));

        assert_eq!(h.client.api().current_user().await, Err(ClientError::AuthExpired));
        settle().await;
        assert_eq!(h.client.connection().state(), ConnectionState::Disconnected);
        assert!(link(&h).sent_commands().contains(&Command::Disconnect));
        assert_eq!(h.client.connection().reconnect_status().pending_delay, None);
    }

    #[tokio::test(start_paused = true)]
    async fn login_then_connect() {
        let h = harness();
        h.client.credentials().clear();
        h.backend.respond(200, json!({"token": "fresh", "userId": "u9"}));

        assert!(h.client.login("a@b.c", "pw").await.is_ok());
        assert!(h.client.connection().is_connected());
        let connect = link(&h).sent().into_iter().find(|f| f.command == Command::Connect);
        assert_eq!(
            connect.as_ref().and_then(|f| f.get("Authorization")),
            Some("Bearer fresh")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_clears_listeners_and_connection() {
        let h = harness();
        let _handle = h.client.events().on_connect(|_| Ok(()));
        assert_eq!(h.client.connect().await, Ok(()));
        h.client.subscribe_to_notifications(|_| {});

        h.client.shutdown();
        assert_eq!(h.client.connection().state(), ConnectionState::Disconnected);
        assert_eq!(h.client.events().listener_count(EventChannel::Connect), 0);
        assert!(h.client.connection().registry().is_empty());
    }
}
