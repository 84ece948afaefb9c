//! Request bodies and query parameters for the chat data API.
//!
//! Field names follow the backend's camelCase JSON.

pub mod auth_dto;
pub mod common_dto;
pub mod message_dto;

pub use auth_dto::*;
pub use common_dto::*;
pub use message_dto::*;
