//! Multi-listener dispatcher for [`ClientEvent`]s.
//!
//! Listeners register on a [`EventChannel`] and receive every event emitted
//! on it, synchronously and in registration order. A listener that returns
//! an error or panics is logged and skipped; the remaining listeners of the
//! same dispatch still run.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{ClientEvent, EventChannel};

type Listener = Arc<dyn Fn(&ClientEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    channels: Mutex<HashMap<EventChannel, Vec<(u64, Listener)>>>,
}

impl Registry {
    fn remove(&self, channel: EventChannel, id: u64) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(listeners) = channels.get_mut(&channel) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }
}

/// Channel-keyed listener registry.
///
/// Cheap to clone; clones share the same listeners.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels = self
            .registry
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = channels.iter().map(|(c, l)| (*c, l.len())).collect();
        f.debug_struct("EventDispatcher")
            .field("listeners", &counts)
            .finish()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `listener` to `channel`.
    ///
    /// Identical listeners are not deduplicated; drop the registration with
    /// [`ListenerHandle::unregister`].
    pub fn register<F>(&self, channel: EventChannel, listener: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel)
            .or_default()
            .push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            channel,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Registers a listener on [`EventChannel::Connect`].
    pub fn on_connect<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventChannel::Connect, listener)
    }

    /// Registers a listener on [`EventChannel::Disconnect`].
    pub fn on_disconnect<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventChannel::Disconnect, listener)
    }

    /// Registers a listener on [`EventChannel::Error`].
    pub fn on_error<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventChannel::Error, listener)
    }

    /// Registers a listener on [`EventChannel::Message`].
    pub fn on_message<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventChannel::Message, listener)
    }

    /// Invokes every listener of the event's channel in registration order.
    ///
    /// Returns the number of listeners that completed without error.
    pub fn emit(&self, event: &ClientEvent) -> usize {
        let channel = event.channel();
        // Snapshot so listeners may register or unregister while running.
        let listeners: Vec<(u64, Listener)> = self
            .registry
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map(|l| l.iter().map(|(id, f)| (*id, Arc::clone(f))).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    tracing::warn!(%channel, listener = id, error = %err, "event listener failed");
                }
                Err(_) => {
                    tracing::error!(%channel, listener = id, "event listener panicked");
                }
            }
        }
        delivered
    }

    /// Returns the number of listeners registered on `channel`.
    #[must_use]
    pub fn listener_count(&self, channel: EventChannel) -> usize {
        self.registry
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .map_or(0, Vec::len)
    }

    /// Drops every listener on every channel.
    pub fn clear(&self) {
        self.registry
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Registration returned by [`EventDispatcher::register`].
///
/// Dropping the handle keeps the listener registered.
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    channel: EventChannel,
    registry: Weak<Registry>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl ListenerHandle {
    /// Channel the listener is registered on.
    #[must_use]
    pub const fn channel(&self) -> EventChannel {
        self.channel
    }

    /// Removes the listener. Returns `false` if it was already gone (the
    /// dispatcher was cleared or dropped).
    pub fn unregister(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.channel, self.id))
    }
}
