//! Websocket transports over `tokio-tungstenite`.
//!
//! Two variants share one socket type:
//!
//! - **SockJS**: connects to `{endpoint}/{server}/{session}/websocket`.
//!   The server wraps outbound data as `a["..."]`, sends `o` on open, `h`
//!   as a keep-alive and `c[code,"reason"]` before closing. Client frames
//!   are sent as a JSON array of strings.
//! - **Raw**: connects to the endpoint itself; each text message carries
//!   STOMP frames directly.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use super::frame::{Frame, FrameBuffer};
use super::{Connector, Transport, TransportVariant};
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens websocket transports to a configured endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    /// Creates a connector for `endpoint` (`http(s)://` or `ws(s)://`).
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// URL dialled for `variant`.
    #[must_use]
    pub fn url_for(&self, variant: TransportVariant) -> String {
        let base = websocket_base(&self.endpoint);
        match variant {
            TransportVariant::RawWebSocket => base,
            TransportVariant::SockJs => {
                let session = Uuid::new_v4();
                let server = session.as_u128() % 1000;
                format!("{base}/{server:03}/{}/websocket", session.simple())
            }
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, variant: TransportVariant) -> Result<Box<dyn Transport>, ClientError> {
        let url = self.url_for(variant);
        tracing::debug!(%url, %variant, "opening websocket");
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Transport(format!("{variant} connect to {url}: {e}")))?;
        Ok(Box::new(WsTransport {
            stream,
            variant,
            pending: VecDeque::new(),
            buffer: FrameBuffer::new(),
            open: true,
        }))
    }
}

fn websocket_base(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// What one SockJS text message meant.
#[derive(Debug, PartialEq, Eq)]
enum SockJsMessage {
    Open,
    Heartbeat,
    Data(Vec<String>),
    Close(String),
}

fn parse_sockjs(text: &str) -> Result<SockJsMessage, ClientError> {
    let (kind, rest) = text.split_at_checked(1).unwrap_or(("", ""));
    match kind {
        "o" => Ok(SockJsMessage::Open),
        "h" => Ok(SockJsMessage::Heartbeat),
        "a" => serde_json::from_str::<Vec<String>>(rest)
            .map(SockJsMessage::Data)
            .map_err(|e| ClientError::Protocol(format!("bad sockjs data frame: {e}"))),
        "c" => Ok(SockJsMessage::Close(rest.to_string())),
        _ => Err(ClientError::Protocol(format!(
            "unexpected sockjs frame {:?}",
            text.chars().take(16).collect::<String>()
        ))),
    }
}

/// A connected websocket carrying STOMP frames.
pub struct WsTransport {
    stream: WsStream,
    variant: TransportVariant,
    pending: VecDeque<Frame>,
    buffer: FrameBuffer,
    open: bool,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("variant", &self.variant)
            .field("pending", &self.pending.len())
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    async fn send_text(&mut self, stomp: String) -> Result<(), ClientError> {
        let text = match self.variant {
            TransportVariant::RawWebSocket => stomp,
            TransportVariant::SockJs => serde_json::to_string(&[stomp])
                .map_err(|e| ClientError::Internal(format!("sockjs encode: {e}")))?,
        };
        let result = self.stream.send(Message::text(text)).await;
        if let Err(e) = result {
            self.open = false;
            return Err(ClientError::Transport(e.to_string()));
        }
        Ok(())
    }

    /// Queues the frames in one inbound text message. Returns `false` when
    /// the message closed the session.
    fn ingest(&mut self, text: &str) -> Result<bool, ClientError> {
        match self.variant {
            TransportVariant::RawWebSocket => {
                self.pending.extend(self.buffer.push(text)?);
            }
            TransportVariant::SockJs => match parse_sockjs(text)? {
                SockJsMessage::Open | SockJsMessage::Heartbeat => {}
                SockJsMessage::Data(chunks) => {
                    for chunk in chunks {
                        self.pending.extend(self.buffer.push(&chunk)?);
                    }
                }
                SockJsMessage::Close(reason) => {
                    tracing::debug!(%reason, "sockjs session closed by server");
                    return Ok(false);
                }
            },
        }
        Ok(true)
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn variant(&self) -> TransportVariant {
        self.variant
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), ClientError> {
        self.send_text(frame.encode()).await
    }

    async fn send_heartbeat(&mut self) -> Result<(), ClientError> {
        self.send_text("\n".to_string()).await
    }

    async fn recv(&mut self) -> Option<Result<Frame, ClientError>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(Ok(frame));
            }
            if !self.open {
                return None;
            }
            let text = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(e) => return Some(Err(ClientError::Protocol(format!("non-utf8 frame: {e}")))),
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.open = false;
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.open = false;
                    return Some(Err(ClientError::Transport(e.to_string())));
                }
            };
            match self.ingest(&text) {
                Ok(true) => {}
                Ok(false) => {
                    self.open = false;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.stream.close(None).await {
                tracing::debug!(error = %e, "websocket close");
            }
        }
    }
}
