//! # chatwire
//!
//! Real-time transport and data-access client for a STOMP/REST chat
//! backend.
//!
//! The crate keeps one persistent publish/subscribe connection alive
//! (authenticated STOMP over websockets, with bounded-backoff reconnection,
//! transport fallback and subscription replay), and puts credential
//! handling, throttling, retry and a stale-while-revalidate cache in front
//! of the HTTP data API.
//!
//! ## Architecture
//!
//! ```text
//! Application
//!     │
//!     └── ChatClient (client.rs)
//!           │
//!           ├── ConnectionManager (connection/)
//!           │     ├── SubscriptionRegistry (transport/subscription)
//!           │     ├── STOMP codec (transport/frame)
//!           │     ├── SockJS / raw websocket (transport/websocket)
//!           │     └── EventDispatcher (events/)
//!           │
//!           └── ChatApi (api/)
//!                 ├── ResponseCache (cache/)
//!                 └── RequestClient (http/)
//!                       ├── CredentialStore ──► SessionBus (events/)
//!                       └── HttpBackend (reqwest)
//! ```

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod http;
pub mod transport;

pub use client::ChatClient;
pub use error::ClientError;
