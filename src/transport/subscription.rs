//! Subscription registry.
//!
//! Tracks the logical subscriptions of one client (destination → handler)
//! independently of any live connection, so they can be replayed after a
//! reconnect. Entries keep insertion order; replay follows it.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Inbound message body handed to a subscription handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Payload {
    /// Body parsed as JSON.
    Json(serde_json::Value),
    /// Body that failed to parse; delivered raw so nothing is dropped.
    Unparsed {
        /// Raw frame body.
        raw: String,
        /// Parser error message.
        error: String,
    },
}

impl Payload {
    /// Parses a frame body, falling back to [`Payload::Unparsed`].
    #[must_use]
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str(body) {
            Ok(value) => Self::Json(value),
            Err(err) => Self::Unparsed {
                raw: body.to_string(),
                error: err.to_string(),
            },
        }
    }

    /// The parsed JSON value, if parsing succeeded.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Unparsed { .. } => None,
        }
    }

    /// `false` when the body could not be parsed.
    #[must_use]
    pub const fn is_parsed(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

/// Callback invoked for every message on a destination.
pub type MessageHandler = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Whether a subscription is currently established on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Recorded; will be sent on the next successful connect.
    Pending,
    /// Sent on the current connection.
    Active,
}

/// Handle returned to the caller of `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Subscribed destination.
    pub destination: String,
    /// STOMP subscription id, stable across reconnects.
    pub id: String,
    /// Wire status at the time the handle was returned.
    pub status: SubscriptionStatus,
}

impl SubscriptionHandle {
    /// `true` if the wire subscription was established immediately.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Result of [`SubscriptionRegistry::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// STOMP subscription id.
    pub id: String,
    /// `true` if an existing entry had its handler replaced.
    pub replaced: bool,
    /// Wire status of the entry after the insert.
    pub active: bool,
}

struct Entry {
    destination: String,
    id: String,
    handler: MessageHandler,
    active: bool,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    next_id: u64,
}

impl State {
    fn find_mut(&mut self, destination: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.destination == destination)
    }
}

/// Destination-keyed subscription store with at most one entry per
/// destination.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    state: Arc<Mutex<State>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("destinations", &self.destinations())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a subscription. An existing entry for `destination` keeps
    /// its id and wire status and only has its handler replaced.
    pub fn insert(&self, destination: &str, handler: MessageHandler) -> Registration {
        let mut state = self.lock();
        if let Some(entry) = state.find_mut(destination) {
            entry.handler = handler;
            return Registration {
                id: entry.id.clone(),
                replaced: true,
                active: entry.active,
            };
        }
        let id = format!("sub-{}", state.next_id);
        state.next_id += 1;
        state.entries.push(Entry {
            destination: destination.to_string(),
            id: id.clone(),
            handler,
            active: false,
        });
        Registration {
            id,
            replaced: false,
            active: false,
        }
    }

    /// Removes the entry for `destination`, returning its id and whether it
    /// was active on the wire.
    pub fn remove(&self, destination: &str) -> Option<(String, bool)> {
        let mut state = self.lock();
        let pos = state
            .entries
            .iter()
            .position(|e| e.destination == destination)?;
        let entry = state.entries.remove(pos);
        Some((entry.id, entry.active))
    }

    /// Returns `true` if `destination` is registered.
    #[must_use]
    pub fn contains(&self, destination: &str) -> bool {
        self.lock().entries.iter().any(|e| e.destination == destination)
    }

    /// Returns `true` if `destination` is registered and active on the wire.
    #[must_use]
    pub fn is_active(&self, destination: &str) -> bool {
        self.lock()
            .entries
            .iter()
            .any(|e| e.destination == destination && e.active)
    }

    /// Registered destinations in insertion order.
    #[must_use]
    pub fn destinations(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .map(|e| e.destination.clone())
            .collect()
    }

    /// `(id, destination)` pairs in insertion order.
    #[must_use]
    pub fn wire_entries(&self) -> Vec<(String, String)> {
        self.lock()
            .entries
            .iter()
            .map(|e| (e.id.clone(), e.destination.clone()))
            .collect()
    }

    /// `(id, destination)` pairs not yet active on the wire.
    #[must_use]
    pub fn inactive_entries(&self) -> Vec<(String, String)> {
        self.lock()
            .entries
            .iter()
            .filter(|e| !e.active)
            .map(|e| (e.id.clone(), e.destination.clone()))
            .collect()
    }

    /// Marks the entries whose id is in `ids` as active.
    pub fn mark_active<S: AsRef<str>>(&self, ids: &[S]) {
        let mut state = self.lock();
        for entry in &mut state.entries {
            if ids.iter().any(|id| id.as_ref() == entry.id) {
                entry.active = true;
            }
        }
    }

    /// Marks every entry as pending (the connection went away).
    pub fn mark_all_inactive(&self) {
        for entry in &mut self.lock().entries {
            entry.active = false;
        }
    }

    /// Delivers `body` to the handler of `destination`.
    ///
    /// Returns the payload that was delivered, or `None` when no handler is
    /// registered. A panicking handler is logged; the payload still counts
    /// as delivered.
    pub fn dispatch(&self, destination: &str, body: &str) -> Option<Payload> {
        let handler = self
            .lock()
            .entries
            .iter()
            .find(|e| e.destination == destination)
            .map(|e| Arc::clone(&e.handler))?;

        let payload = Payload::parse(body);
        if let Payload::Unparsed { error, .. } = &payload {
            tracing::warn!(destination, %error, "delivering unparsed message body");
        }
        if catch_unwind(AssertUnwindSafe(|| handler(&payload))).is_err() {
            tracing::error!(destination, "subscription handler panicked");
        }
        Some(payload)
    }

    /// Number of registered destinations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}
