//! Event layer: lifecycle events, the listener dispatcher, and the session
//! bus.
//!
//! Connection lifecycle notifications flow through the synchronous
//! [`EventDispatcher`]; "session ended" notifications from the request
//! layer flow through the broadcast-backed [`SessionBus`].

pub mod dispatcher;
pub mod event;
pub mod session_bus;

pub use dispatcher::{EventDispatcher, ListenerHandle};
pub use event::{ClientEvent, EventChannel};
pub use session_bus::{SessionBus, SessionEndReason, SessionEvent};
