//! One live STOMP session: the handshake and the read/write loop.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

use crate::error::ClientError;
use crate::events::{ClientEvent, EventDispatcher};
use crate::transport::frame::negotiate_heartbeat;
use crate::transport::{
    Command, Connector, Frame, SubscriptionRegistry, Transport, TransportVariant,
};

/// Placeholder period for a disabled ticker.
const IDLE_PERIOD: Duration = Duration::from_secs(3600);

/// Work queued for the session task.
#[derive(Debug)]
pub(super) enum Outbound {
    Frame(Frame),
    /// Send `DISCONNECT`, close the socket and stop without reporting.
    Disconnect,
}

/// How a session ended.
#[derive(Debug)]
pub(super) enum SessionEnd {
    Graceful,
    Failed(ClientError),
}

/// Opens a transport, performs the STOMP handshake and replays `replay`
/// (`(id, destination)` pairs) before returning.
///
/// Returns the transport and the negotiated outgoing heart-beat interval.
pub(super) async fn handshake(
    connector: &dyn Connector,
    variant: TransportVariant,
    token: &str,
    heartbeat_ms: (u64, u64),
    replay: &[(String, String)],
) -> Result<(Box<dyn Transport>, Option<Duration>), ClientError> {
    let mut transport = connector.open(variant).await?;
    match negotiate(transport.as_mut(), token, heartbeat_ms, replay).await {
        Ok(heartbeat) => Ok((transport, heartbeat)),
        Err(err) => {
            transport.close().await;
            Err(err)
        }
    }
}

async fn negotiate(
    transport: &mut dyn Transport,
    token: &str,
    heartbeat_ms: (u64, u64),
    replay: &[(String, String)],
) -> Result<Option<Duration>, ClientError> {
    transport.send(&Frame::connect(token, heartbeat_ms)).await?;
    let connected = loop {
        match transport.recv().await {
            Some(Ok(frame)) if frame.command == Command::Connected => break frame,
            Some(Ok(frame)) if frame.command == Command::Error => {
                return Err(ClientError::Protocol(error_message(&frame)));
            }
            Some(Ok(frame)) => {
                tracing::debug!(command = %frame.command, "ignoring frame before CONNECTED");
            }
            Some(Err(err)) => return Err(err),
            None => {
                return Err(ClientError::Transport(
                    "connection closed during handshake".to_string(),
                ));
            }
        }
    };
    for (id, destination) in replay {
        transport.send(&Frame::subscribe(id, destination)).await?;
        tracing::debug!(%destination, id, "subscription replayed");
    }
    Ok(negotiate_heartbeat(heartbeat_ms, connected.get("heart-beat")))
}

fn error_message(frame: &Frame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| frame.body.clone())
}

/// The per-connection task state.
pub(super) struct Session {
    pub(super) transport: Box<dyn Transport>,
    pub(super) outbound: mpsc::UnboundedReceiver<Outbound>,
    pub(super) registry: SubscriptionRegistry,
    pub(super) events: EventDispatcher,
    pub(super) health_interval: Duration,
    pub(super) stomp_heartbeat: Option<Duration>,
}

impl Session {
    /// Runs until the session fails or is closed.
    ///
    /// Queued outbound frames are always drained before the next inbound
    /// frame is dispatched, so subscriptions queued at connect time reach
    /// the broker first.
    pub(super) async fn run(mut self) -> SessionEnd {
        // A zero period disables the ticker; `interval_at` rejects zero.
        let checks = !self.health_interval.is_zero();
        let health_period = if checks { self.health_interval } else { IDLE_PERIOD };
        let mut health = interval_at(Instant::now() + health_period, health_period);
        let stomp_beat = self.stomp_heartbeat.filter(|p| !p.is_zero());
        let beats = stomp_beat.is_some();
        let beat_period = stomp_beat.unwrap_or(IDLE_PERIOD);
        let mut beat = interval_at(Instant::now() + beat_period, beat_period);

        loop {
            tokio::select! {
                biased;

                cmd = self.outbound.recv() => match cmd {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(err) = self.transport.send(&frame).await {
                            return SessionEnd::Failed(err);
                        }
                    }
                    Some(Outbound::Disconnect) | None => {
                        if let Err(err) = self.transport.send(&Frame::disconnect()).await {
                            tracing::debug!(error = %err, "DISCONNECT not delivered");
                        }
                        self.transport.close().await;
                        return SessionEnd::Graceful;
                    }
                },

                inbound = self.transport.recv() => match inbound {
                    Some(Ok(frame)) => {
                        if let Err(err) = self.handle(frame) {
                            return SessionEnd::Failed(err);
                        }
                    }
                    Some(Err(err)) => return SessionEnd::Failed(err),
                    None => {
                        return SessionEnd::Failed(ClientError::Transport(
                            "connection closed by peer".to_string(),
                        ));
                    }
                },

                _ = health.tick(), if checks => {
                    if !self.transport.is_connected() {
                        return SessionEnd::Failed(ClientError::Transport(
                            "heartbeat check found transport closed".to_string(),
                        ));
                    }
                }

                _ = beat.tick(), if beats => {
                    if let Err(err) = self.transport.send_heartbeat().await {
                        return SessionEnd::Failed(err);
                    }
                }
            }
        }
    }

    fn handle(&self, frame: Frame) -> Result<(), ClientError> {
        match frame.command {
            Command::Message => {
                let Some(destination) = frame.get("destination") else {
                    tracing::warn!("MESSAGE frame without destination dropped");
                    return Ok(());
                };
                match self.registry.dispatch(destination, &frame.body) {
                    Some(payload) => {
                        self.events.emit(&ClientEvent::Message {
                            destination: destination.to_string(),
                            payload,
                            timestamp: Utc::now(),
                        });
                    }
                    None => tracing::debug!(destination, "message for unknown destination dropped"),
                }
                Ok(())
            }
            Command::Error => {
                let message = error_message(&frame);
                tracing::error!(%message, "broker sent ERROR frame");
                Err(ClientError::Protocol(message))
            }
            Command::Receipt | Command::Connected => Ok(()),
            other => {
                tracing::debug!(command = %other, "unexpected client frame from broker ignored");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("variant", &self.transport.variant())
            .field("health_interval", &self.health_interval)
            .field("stomp_heartbeat", &self.stomp_heartbeat)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::testing::{Handshake, MockConnector};

    #[tokio::test]
    async fn handshake_sends_connect_then_replays_in_order() {
        let connector = MockConnector::new();
        let replay = vec![
            ("sub-0".to_string(), "/topic/conversations/A".to_string()),
            ("sub-1".to_string(), "/topic/conversations/B".to_string()),
        ];
        let result = handshake(
            connector.as_ref(),
            TransportVariant::SockJs,
            "tok",
            (10_000, 10_000),
            &replay,
        )
        .await;
        let Ok((_transport, heartbeat)) = result else {
            panic!("handshake failed");
        };
        assert_eq!(heartbeat, None);

        let Some(link) = connector.last_link() else {
            panic!("no transport opened");
        };
        let sent = link.sent();
        let Some(connect) = sent.first() else {
            panic!("nothing sent");
        };
        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.get("Authorization"), Some("Bearer tok"));
        assert_eq!(
            link.subscribed(),
            vec!["/topic/conversations/A", "/topic/conversations/B"]
        );
    }

    #[tokio::test]
    async fn rejected_handshake_is_protocol_error_and_closes() {
        let connector = MockConnector::new();
        connector.set_handshake(Handshake::Reject);
        let result = handshake(
            connector.as_ref(),
            TransportVariant::RawWebSocket,
            "tok",
            (0, 0),
            &[],
        )
        .await;
        let Err(ClientError::Protocol(message)) = result else {
            panic!("expected protocol error");
        };
        assert_eq!(message, "bad credentials");
        let Some(link) = connector.last_link() else {
            panic!("no transport opened");
        };
        assert!(!link.is_alive());
    }

    #[tokio::test]
    async fn session_dispatches_and_reports_peer_close() {
        let connector = MockConnector::new();
        let Ok((transport, _)) =
            handshake(connector.as_ref(), TransportVariant::SockJs, "t", (0, 0), &[]).await
        else {
            panic!("handshake failed");
        };
        let Some(link) = connector.last_link() else {
            panic!("no transport opened");
        };

        let registry = SubscriptionRegistry::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        registry.insert(
            "/topic/conversations/1",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let events = EventDispatcher::new();
        let messages = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&messages);
        let _handle = events.on_message(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (_tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            transport,
            outbound: rx,
            registry,
            events,
            health_interval: Duration::from_secs(30),
            stomp_heartbeat: None,
        };
        link.deliver("/topic/conversations/1", "{\"id\":1}");
        link.deliver("/topic/conversations/2", "{\"id\":2}");
        link.close();

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::Failed(ClientError::Transport(_))));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(messages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_detects_silent_death() {
        let connector = MockConnector::new();
        let Ok((transport, _)) =
            handshake(connector.as_ref(), TransportVariant::SockJs, "t", (0, 0), &[]).await
        else {
            panic!("handshake failed");
        };
        let Some(link) = connector.last_link() else {
            panic!("no transport opened");
        };
        let (_tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            transport,
            outbound: rx,
            registry: SubscriptionRegistry::new(),
            events: EventDispatcher::new(),
            health_interval: Duration::from_secs(30),
            stomp_heartbeat: None,
        };
        link.kill_silently();
        let end = session.run().await;
        assert!(matches!(end, SessionEnd::Failed(ClientError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_health_interval_disables_the_check() {
        let connector = MockConnector::new();
        let Ok((transport, _)) =
            handshake(connector.as_ref(), TransportVariant::SockJs, "t", (0, 0), &[]).await
        else {
            panic!("handshake failed");
        };
        let Some(link) = connector.last_link() else {
            panic!("no transport opened");
        };
        let (_tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            transport,
            outbound: rx,
            registry: SubscriptionRegistry::new(),
            events: EventDispatcher::new(),
            health_interval: Duration::ZERO,
            stomp_heartbeat: Some(Duration::ZERO),
        };
        link.close();
        let end = session.run().await;
        assert!(matches!(end, SessionEnd::Failed(ClientError::Transport(_))));
    }

    #[tokio::test]
    async fn disconnect_command_closes_gracefully() {
        let connector = MockConnector::new();
        let Ok((transport, _)) =
            handshake(connector.as_ref(), TransportVariant::SockJs, "t", (0, 0), &[]).await
        else {
            panic!("handshake failed");
        };
        let Some(link) = connector.last_link() else {
            panic!("no transport opened");
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            transport,
            outbound: rx,
            registry: SubscriptionRegistry::new(),
            events: EventDispatcher::new(),
            health_interval: Duration::from_secs(30),
            stomp_heartbeat: None,
        };
        let _ = tx.send(Outbound::Disconnect);
        assert!(matches!(session.run().await, SessionEnd::Graceful));
        assert_eq!(link.sent_commands().last(), Some(&Command::Disconnect));
        assert!(!link.is_alive());
    }
}
