//! The connection manager.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backoff::{Backoff, ReconnectPolicy};
use super::session::{self, Outbound, Session, SessionEnd};
use super::{ConnectionState, ReconnectStatus};
use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::events::{ClientEvent, EventDispatcher};
use crate::http::CredentialStore;
use crate::transport::{
    Connector, Frame, Payload, SubscriptionHandle, SubscriptionRegistry, SubscriptionStatus,
    Transport, TransportVariant,
};

struct PendingTimer {
    id: u64,
    delay: Duration,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ReconnectState {
    attempt_count: u32,
    pending: Option<PendingTimer>,
    scheduled_total: u64,
}

impl ReconnectState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.pending.take() {
            timer.handle.abort();
            tracing::debug!(
                delay_ms = timer.delay.as_millis() as u64,
                "reconnect timer cancelled"
            );
        }
    }
}

struct SessionLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

struct Shared {
    connection: ConnectionState,
    reconnect: ReconnectState,
    session: Option<SessionLink>,
    /// Bumped whenever the current attempt or session is superseded;
    /// results and failure reports tagged with an older value are ignored.
    generation: u64,
    attempt_in_flight: bool,
    transport_attempts: u64,
}

impl Shared {
    fn send(&self, frame: Frame) -> Result<(), ClientError> {
        let link = self
            .session
            .as_ref()
            .filter(|_| self.connection == ConnectionState::Connected)
            .ok_or(ClientError::NotConnected)?;
        link.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Supersedes the current session and attempt.
    fn supersede(&mut self, graceful: bool) {
        if let Some(link) = self.session.take() {
            if graceful {
                let _ = link.outbound.send(Outbound::Disconnect);
            } else {
                link.task.abort();
            }
        }
        self.generation += 1;
        self.attempt_in_flight = false;
    }
}

struct Inner {
    config: ConnectionConfig,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    registry: SubscriptionRegistry,
    events: EventDispatcher,
    shared: Mutex<Shared>,
}

/// Owns the persistent STOMP connection of one client.
///
/// Cheap to clone; clones drive the same connection. Background tasks
/// (the session loop and reconnect timers) hold only weak references, so
/// dropping every clone tears the connection down.
///
/// Lock order: the manager's state lock is taken before the subscription
/// registry's, never the other way round, and neither is held across an
/// `.await`.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .field("reconnect", &self.reconnect_status())
            .field("subscriptions", &self.inner.registry.len())
            .finish()
    }
}

enum Install {
    Installed { subscriptions: usize },
    Superseded(Box<dyn Transport>),
}

impl ConnectionManager {
    /// Creates a manager in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        events: EventDispatcher,
    ) -> Self {
        let policy = ReconnectPolicy::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                connector,
                credentials,
                registry: SubscriptionRegistry::new(),
                events,
                shared: Mutex::new(Shared {
                    connection: ConnectionState::Disconnected,
                    reconnect: ReconnectState::default(),
                    session: None,
                    generation: 0,
                    attempt_in_flight: false,
                    transport_attempts: 0,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// `true` when the handshake completed and the session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnection bookkeeping snapshot.
    #[must_use]
    pub fn reconnect_status(&self) -> ReconnectStatus {
        let shared = self.lock();
        ReconnectStatus {
            attempt_count: shared.reconnect.attempt_count,
            pending_delay: shared.reconnect.pending.as_ref().map(|t| t.delay),
            timers_scheduled: shared.reconnect.scheduled_total,
        }
    }

    /// The subscription registry replayed on every connect.
    #[must_use]
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// The dispatcher lifecycle events are emitted on.
    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    fn credential(&self) -> Result<String, ClientError> {
        let credentials = &self.inner.credentials;
        match credentials.token() {
            Some(token) if !credentials.is_expired() => Ok(token),
            _ => Err(ClientError::AuthRequired),
        }
    }

    /// Connects if not already connected or connecting.
    ///
    /// Cancels a pending reconnect timer and, from
    /// [`ConnectionState::Failed`], resets the failure count. A failed
    /// attempt is also fed into the reconnect schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AuthRequired`] without changing state when no
    /// valid credential is available, or the error of the failed attempt.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let token = self.credential()?;
        {
            let mut shared = self.lock();
            if shared.connection == ConnectionState::Connected || shared.attempt_in_flight {
                return Ok(());
            }
            if shared.connection == ConnectionState::Failed {
                shared.reconnect.attempt_count = 0;
            }
            shared.reconnect.cancel_timer();
        }
        self.attempt(token).await
    }

    /// Tears down any session, resets the failure count and connects now.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionManager::connect`].
    pub async fn force_reconnect(&self) -> Result<(), ClientError> {
        let previous = {
            let mut shared = self.lock();
            shared.reconnect.cancel_timer();
            shared.reconnect.attempt_count = 0;
            shared.supersede(false);
            self.inner.registry.mark_all_inactive();
            std::mem::replace(&mut shared.connection, ConnectionState::Disconnected)
        };
        tracing::info!(%previous, "forced reconnect");
        if previous == ConnectionState::Connected {
            self.emit(&[ClientEvent::Disconnected {
                reason: "reconnect requested".to_string(),
                deliberate: true,
                timestamp: Utc::now(),
            }]);
        }
        let token = self.credential()?;
        self.attempt(token).await
    }

    /// Deliberately closes the connection.
    ///
    /// Sends `DISCONNECT`, cancels the health check and any pending
    /// reconnect timer, and clears every subscription. The close that
    /// follows is never treated as a failure.
    pub fn disconnect(&self) {
        let previous = {
            let mut shared = self.lock();
            shared.reconnect.cancel_timer();
            shared.reconnect.attempt_count = 0;
            shared.supersede(true);
            self.inner.registry.clear();
            std::mem::replace(&mut shared.connection, ConnectionState::Disconnected)
        };
        tracing::info!(%previous, "disconnected by caller");
        if previous != ConnectionState::Disconnected {
            self.emit(&[ClientEvent::Disconnected {
                reason: "disconnect requested".to_string(),
                deliberate: true,
                timestamp: Utc::now(),
            }]);
        }
    }

    /// [`ConnectionManager::disconnect`] plus dropping every event listener.
    pub fn shutdown(&self) {
        self.disconnect();
        self.inner.events.clear();
    }

    /// Subscribes `handler` to `destination`.
    ///
    /// When connected the wire subscription is sent immediately; otherwise
    /// it is recorded and sent on the next successful connect. Subscribing
    /// again to the same destination only replaces the handler.
    pub fn subscribe<F>(&self, destination: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let shared = self.lock();
        let registration = self.inner.registry.insert(destination, Arc::new(handler));
        let status = if registration.active {
            SubscriptionStatus::Active
        } else if shared
            .send(Frame::subscribe(&registration.id, destination))
            .is_ok()
        {
            self.inner.registry.mark_active(&[registration.id.as_str()]);
            SubscriptionStatus::Active
        } else {
            SubscriptionStatus::Pending
        };
        tracing::debug!(destination, id = %registration.id, ?status, replaced = registration.replaced, "subscribed");
        SubscriptionHandle {
            destination: destination.to_string(),
            id: registration.id,
            status,
        }
    }

    /// Removes the subscription for `destination`, sending `UNSUBSCRIBE`
    /// when it is live. Returns `false` if nothing was subscribed.
    pub fn unsubscribe(&self, destination: &str) -> bool {
        let shared = self.lock();
        let Some((id, active)) = self.inner.registry.remove(destination) else {
            return false;
        };
        if active {
            if let Err(err) = shared.send(Frame::unsubscribe(&id)) {
                tracing::debug!(destination, error = %err, "UNSUBSCRIBE not sent");
            }
        }
        tracing::debug!(destination, id, "unsubscribed");
        true
    }

    /// Publishes a JSON body to `destination`, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Returns the connect error, or [`ClientError::NotConnected`] if the
    /// connection is still being established or dropped meanwhile.
    pub async fn publish(
        &self,
        destination: &str,
        body: &serde_json::Value,
    ) -> Result<(), ClientError> {
        if !self.is_connected() {
            self.connect().await?;
        }
        self.lock().send(Frame::send_json(destination, body))
    }

    async fn attempt(&self, token: String) -> Result<(), ClientError> {
        let (generation, variant, replay) = {
            let mut shared = self.lock();
            if shared.attempt_in_flight || shared.connection == ConnectionState::Connected {
                return Ok(());
            }
            shared.generation += 1;
            shared.attempt_in_flight = true;
            shared.connection = ConnectionState::Connecting;
            let variant = TransportVariant::for_attempt(shared.transport_attempts);
            shared.transport_attempts += 1;
            (shared.generation, variant, self.inner.registry.wire_entries())
        };

        let config = &self.inner.config;
        tracing::info!(%variant, generation, subscriptions = replay.len(), "connecting");
        let opened = tokio::time::timeout(
            config.connect_timeout,
            session::handshake(
                self.inner.connector.as_ref(),
                variant,
                &token,
                config.stomp_heartbeat_ms,
                &replay,
            ),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ClientError::Transport(format!(
                "connect timed out after {}ms",
                config.connect_timeout.as_millis()
            )))
        });

        match opened {
            Ok((transport, heartbeat)) => {
                match self.install(generation, transport, heartbeat, &replay) {
                    Install::Installed { subscriptions } => {
                        tracing::info!(%variant, subscriptions, "connected");
                        self.emit(&[ClientEvent::Connected {
                            transport: variant,
                            replayed: subscriptions,
                            timestamp: Utc::now(),
                        }]);
                        Ok(())
                    }
                    Install::Superseded(mut transport) => {
                        transport.close().await;
                        tracing::debug!(generation, "connect attempt superseded");
                        Err(ClientError::Transport(
                            "connect attempt superseded".to_string(),
                        ))
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%variant, error = %err, "connect attempt failed");
                self.on_failure(generation, &err);
                Err(err)
            }
        }
    }

    /// Makes a handshaken transport the live session, unless the attempt
    /// was superseded while it ran.
    fn install(
        &self,
        generation: u64,
        transport: Box<dyn Transport>,
        stomp_heartbeat: Option<Duration>,
        replay: &[(String, String)],
    ) -> Install {
        let mut shared = self.lock();
        if shared.generation != generation || shared.connection != ConnectionState::Connecting {
            return Install::Superseded(transport);
        }
        let registry = &self.inner.registry;
        let (tx, rx) = mpsc::unbounded_channel();

        // Reconcile changes made to the registry while the handshake ran.
        let live = registry.wire_entries();
        for (id, destination) in replay {
            if !live.iter().any(|(live_id, _)| live_id == id) {
                tracing::debug!(%destination, id, "dropping subscription removed during connect");
                let _ = tx.send(Outbound::Frame(Frame::unsubscribe(id)));
            }
        }
        let replayed: Vec<&str> = replay.iter().map(|(id, _)| id.as_str()).collect();
        registry.mark_active(&replayed);
        let late = registry.inactive_entries();
        for (id, destination) in &late {
            let _ = tx.send(Outbound::Frame(Frame::subscribe(id, destination)));
        }
        let late_ids: Vec<&str> = late.iter().map(|(id, _)| id.as_str()).collect();
        registry.mark_active(&late_ids);

        let session = Session {
            transport,
            outbound: rx,
            registry: registry.clone(),
            events: self.inner.events.clone(),
            health_interval: self.inner.config.heartbeat_interval,
            stomp_heartbeat,
        };
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            if let SessionEnd::Failed(err) = session.run().await {
                if let Some(inner) = weak.upgrade() {
                    ConnectionManager { inner }.on_failure(generation, &err);
                }
            }
        });

        shared.session = Some(SessionLink { outbound: tx, task });
        shared.connection = ConnectionState::Connected;
        shared.attempt_in_flight = false;
        shared.reconnect.attempt_count = 0;
        shared.reconnect.cancel_timer();
        Install::Installed {
            subscriptions: registry.len(),
        }
    }

    /// Handles a failed attempt or a lost session of `generation`.
    fn on_failure(&self, generation: u64, error: &ClientError) {
        let mut events = Vec::new();
        {
            let mut shared = self.lock();
            if shared.generation != generation {
                tracing::debug!(generation, error = %error, "stale failure report ignored");
                return;
            }
            if matches!(
                shared.connection,
                ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                return;
            }
            let was_connected = shared.connection == ConnectionState::Connected;
            shared.session = None;
            shared.generation += 1;
            shared.attempt_in_flight = false;
            self.inner.registry.mark_all_inactive();
            if was_connected {
                events.push(ClientEvent::Disconnected {
                    reason: error.to_string(),
                    deliberate: false,
                    timestamp: Utc::now(),
                });
            }

            if shared.reconnect.pending.is_some() {
                tracing::debug!(error = %error, "reconnect already pending");
            } else {
                match self.inner.policy.next(shared.reconnect.attempt_count) {
                    Backoff::Retry { delay, attempt } => {
                        shared.reconnect.attempt_count = attempt;
                        shared.connection = ConnectionState::Connecting;
                        self.schedule_reconnect(&mut shared, delay);
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "connection failed; reconnect scheduled"
                        );
                        events.push(ClientEvent::Error {
                            message: error.to_string(),
                            recoverable: true,
                            attempt,
                            timestamp: Utc::now(),
                        });
                    }
                    Backoff::Exhausted { attempt } => {
                        shared.reconnect.attempt_count = attempt;
                        shared.connection = ConnectionState::Failed;
                        tracing::error!(attempt, error = %error, "reconnect attempts exhausted");
                        events.push(ClientEvent::Error {
                            message: format!(
                                "giving up after {attempt} consecutive failures: {error}"
                            ),
                            recoverable: false,
                            attempt,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        }
        self.emit(&events);
    }

    fn schedule_reconnect(&self, shared: &mut Shared, delay: Duration) {
        shared.reconnect.scheduled_total += 1;
        let id = shared.reconnect.scheduled_total;
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                ConnectionManager { inner }.fire_reconnect(id).await;
            }
        });
        shared.reconnect.pending = Some(PendingTimer { id, delay, handle });
    }

    async fn fire_reconnect(&self, timer_id: u64) {
        {
            let mut shared = self.lock();
            let due = shared
                .reconnect
                .pending
                .as_ref()
                .is_some_and(|t| t.id == timer_id);
            if !due {
                return;
            }
            shared.reconnect.pending = None;
        }
        let result = match self.credential() {
            Ok(token) => self.attempt(token).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {}
            Err(ClientError::AuthRequired) => {
                let attempt = {
                    let mut shared = self.lock();
                    if !shared.attempt_in_flight {
                        shared.connection = ConnectionState::Disconnected;
                    }
                    shared.reconnect.attempt_count
                };
                tracing::warn!(attempt, "reconnect abandoned: no valid credential");
                self.emit(&[ClientEvent::Error {
                    message: ClientError::AuthRequired.to_string(),
                    recoverable: false,
                    attempt,
                    timestamp: Utc::now(),
                }]);
            }
            Err(err) => tracing::debug!(error = %err, "scheduled reconnect failed"),
        }
    }

    fn emit(&self, events: &[ClientEvent]) {
        for event in events {
            self.inner.events.emit(event);
        }
    }
}
