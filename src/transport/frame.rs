//! STOMP 1.2 frame codec.
//!
//! A frame is `COMMAND EOL *(header EOL) EOL body NUL`. Header values are
//! escaped (`\\`, `\n`, `\r`, `\c`) on every frame except `CONNECT` and
//! `CONNECTED`. Bare EOLs between frames are heart-beats and are skipped.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ClientError;

/// STOMP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client → broker handshake.
    Connect,
    /// Broker → client handshake acknowledgement.
    Connected,
    /// Client → broker publish.
    Send,
    /// Client → broker subscription.
    Subscribe,
    /// Client → broker subscription removal.
    Unsubscribe,
    /// Client → broker graceful close.
    Disconnect,
    /// Broker → client delivery.
    Message,
    /// Broker → client receipt.
    Receipt,
    /// Broker → client error; the broker closes the connection after it.
    Error,
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl FromStr for Command {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" | "STOMP" => Ok(Self::Connect),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "DISCONNECT" => Ok(Self::Disconnect),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            other => Err(ClientError::Protocol(format!("unknown command {other:?}"))),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are allowed; the first wins.
    pub headers: Vec<(String, String)>,
    /// Frame body (UTF-8 text).
    pub body: String,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of header `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` frame carrying the bearer credential.
    #[must_use]
    pub fn connect(token: &str, heartbeat_ms: (u64, u64)) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("heart-beat", format!("{},{}", heartbeat_ms.0, heartbeat_ms.1))
            .header("Authorization", format!("Bearer {token}"))
    }

    /// `SUBSCRIBE` frame for `destination` under subscription `id`.
    #[must_use]
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// `UNSUBSCRIBE` frame for subscription `id`.
    #[must_use]
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// `SEND` frame with a JSON body.
    #[must_use]
    pub fn send_json(destination: &str, body: &serde_json::Value) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(body.to_string())
    }

    /// `DISCONNECT` frame.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Encodes the frame to its wire text, adding `content-length` when
    /// the body is non-empty.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decodes every frame in `input`, skipping heart-beats.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] on an unknown command, a malformed
    /// header, a bad escape sequence, or a missing terminator.
    pub fn decode_all(input: &str) -> Result<Vec<Self>, ClientError> {
        let mut frames = Vec::new();
        let mut rest = input;
        loop {
            rest = rest.trim_start_matches(['\n', '\r']);
            if rest.is_empty() {
                return Ok(frames);
            }
            let (frame, tail) = parse_frame(rest)?
                .ok_or_else(|| ClientError::Protocol("incomplete frame".to_string()))?;
            frames.push(frame);
            rest = tail;
        }
    }
}

/// Largest partial frame kept while waiting for the rest of it.
const MAX_RESIDUAL: usize = 1 << 20;

/// Reassembles frames split across transport messages.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    residual: String,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame it completes, in order.
    /// A trailing partial frame is kept for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] on a malformed frame or when a
    /// partial frame outgrows the buffer limit. The buffer is emptied.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<Frame>, ClientError> {
        self.residual.push_str(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0;
        let outcome = loop {
            let rest = self.residual.get(consumed..).unwrap_or_default();
            let trimmed = rest.trim_start_matches(['\n', '\r']);
            consumed += rest.len() - trimmed.len();
            if trimmed.is_empty() {
                break Ok(());
            }
            match parse_frame(trimmed) {
                Ok(Some((frame, tail))) => {
                    frames.push(frame);
                    consumed += trimmed.len() - tail.len();
                }
                Ok(None) if trimmed.len() > MAX_RESIDUAL => {
                    break Err(ClientError::Protocol(format!(
                        "partial frame exceeds {MAX_RESIDUAL} bytes"
                    )));
                }
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        match outcome {
            Ok(()) => {
                self.residual.replace_range(..consumed, "");
                Ok(frames)
            }
            Err(err) => {
                self.residual.clear();
                Err(err)
            }
        }
    }

    /// `true` when no partial frame is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.residual.is_empty()
    }
}

/// Parses one frame from the front of `input`. `Ok(None)` means the frame
/// is not complete yet.
fn parse_frame(input: &str) -> Result<Option<(Frame, &str)>, ClientError> {
    let Some((head, after_head)) = split_head(input) else {
        return Ok(None);
    };
    let mut lines = head.lines();
    let command: Command = lines
        .next()
        .ok_or_else(|| ClientError::Protocol("empty frame".to_string()))?
        .parse()?;

    let escaped = command.escapes_headers();
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ClientError::Protocol(format!("malformed header line {line:?}")))?;
        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| v.trim().parse::<usize>())
        .transpose()
        .map_err(|e| ClientError::Protocol(format!("bad content-length: {e}")))?;

    let (body, tail) = match content_length {
        Some(len) => {
            if after_head.len() <= len {
                return Ok(None);
            }
            let body = after_head
                .get(..len)
                .ok_or_else(|| ClientError::Protocol("content-length splits a character".into()))?;
            let tail = after_head
                .get(len..)
                .and_then(|t| t.strip_prefix('\0'))
                .ok_or_else(|| ClientError::Protocol("frame missing NUL terminator".into()))?;
            (body, tail)
        }
        None => match after_head.split_once('\0') {
            Some(split) => split,
            None => return Ok(None),
        },
    };

    Ok(Some((
        Frame {
            command,
            headers,
            body: body.to_string(),
        },
        tail,
    )))
}

/// Splits at the blank line ending the header block.
fn split_head(input: &str) -> Option<(&str, &str)> {
    let lf = input.find("\n\n").map(|i| (i, 2));
    let crlf = input.find("\r\n\r\n").map(|i| (i, 4));
    let (at, sep) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let head = input.get(..at).unwrap_or_default();
    let rest = input.get(at + sep..).unwrap_or_default();
    Some((head, rest))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, ClientError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ClientError::Protocol(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

/// Interval at which the client must send heart-beats, negotiated from the
/// client's `heart-beat` setting and the broker's `CONNECTED` header.
///
/// Returns `None` when either side disables outgoing heart-beats.
#[must_use]
pub fn negotiate_heartbeat(client_ms: (u64, u64), server_header: Option<&str>) -> Option<Duration> {
    let (_, server_wants) = server_header?
        .split_once(',')
        .map(|(a, b)| (a.trim().parse::<u64>(), b.trim().parse::<u64>()))
        .and_then(|(a, b)| Some((a.ok()?, b.ok()?)))?;
    if client_ms.0 == 0 || server_wants == 0 {
        return None;
    }
    Some(Duration::from_millis(client_ms.0.max(server_wants)))
}
