//! In-memory [`Connector`] and [`Transport`] used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::frame::{Command, Frame};
use super::{Connector, Transport, TransportVariant};
use crate::error::ClientError;

/// Something the fake broker pushes at the client.
#[derive(Debug)]
pub(crate) enum Inbound {
    Frame(Frame),
    Error(ClientError),
    Close,
}

/// Test-side view of one opened transport.
#[derive(Debug, Clone)]
pub(crate) struct MockLink {
    pub(crate) variant: TransportVariant,
    sent: Arc<Mutex<Vec<Frame>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    alive: Arc<AtomicBool>,
}

impl MockLink {
    pub(crate) fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn sent_commands(&self) -> Vec<Command> {
        self.sent().iter().map(|f| f.command).collect()
    }

    /// Destinations of every `SUBSCRIBE` sent, in order.
    pub(crate) fn subscribed(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter(|f| f.command == Command::Subscribe)
            .filter_map(|f| f.get("destination").map(str::to_string))
            .collect()
    }

    pub(crate) fn deliver(&self, destination: &str, body: &str) {
        let frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", "sub-0")
            .with_body(body);
        let _ = self.inbound.send(Inbound::Frame(frame));
    }

    pub(crate) fn push(&self, inbound: Inbound) {
        let _ = self.inbound.send(inbound);
    }

    /// Peer close, reported through `recv`.
    pub(crate) fn close(&self) {
        self.push(Inbound::Close);
    }

    /// Socket dies without any close notification.
    pub(crate) fn kill_silently(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// How the fake broker answers `CONNECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handshake {
    Accept,
    Reject,
    Silent,
}

#[derive(Debug)]
pub(crate) struct MockConnector {
    refuse: AtomicBool,
    handshake: Mutex<Handshake>,
    links: Mutex<Vec<MockLink>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            refuse: AtomicBool::new(false),
            handshake: Mutex::new(Handshake::Accept),
            links: Mutex::new(Vec::new()),
        }
    }
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every subsequent `open` fail.
    pub(crate) fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn set_handshake(&self, handshake: Handshake) {
        *self.handshake.lock().unwrap_or_else(PoisonError::into_inner) = handshake;
    }

    pub(crate) fn links(&self) -> Vec<MockLink> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn last_link(&self) -> Option<MockLink> {
        self.links().last().cloned()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.links.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, variant: TransportVariant) -> Result<Box<dyn Transport>, ClientError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(format!("{variant} refused")));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let link = MockLink {
            variant,
            sent: Arc::new(Mutex::new(Vec::new())),
            inbound: tx,
            alive: Arc::new(AtomicBool::new(true)),
        };
        let transport = MockTransport {
            variant,
            handshake: *self.handshake.lock().unwrap_or_else(PoisonError::into_inner),
            sent: Arc::clone(&link.sent),
            alive: Arc::clone(&link.alive),
            replies: VecDeque::new(),
            inbound: rx,
        };
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(link);
        Ok(Box::new(transport))
    }
}

#[derive(Debug)]
struct MockTransport {
    variant: TransportVariant,
    handshake: Handshake,
    sent: Arc<Mutex<Vec<Frame>>>,
    alive: Arc<AtomicBool>,
    replies: VecDeque<Frame>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl Transport for MockTransport {
    fn variant(&self) -> TransportVariant {
        self.variant
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), ClientError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("socket closed".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        if frame.command == Command::Connect {
            match self.handshake {
                Handshake::Accept => self.replies.push_back(
                    Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", "0,0"),
                ),
                Handshake::Reject => self.replies.push_back(
                    Frame::new(Command::Error).header("message", "bad credentials"),
                ),
                Handshake::Silent => {}
            }
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame, ClientError>> {
        if let Some(reply) = self.replies.pop_front() {
            return Some(Ok(reply));
        }
        match self.inbound.recv().await? {
            Inbound::Frame(frame) => Some(Ok(frame)),
            Inbound::Error(err) => Some(Err(err)),
            Inbound::Close => {
                self.alive.store(false, Ordering::SeqCst);
                None
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}
