//! Message bodies, for both the data API and STOMP publishes.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Body of `PUT /messages/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditMessageRequest {
    /// Replacement text.
    pub content: String,
}

/// Published to `/app/conversations/{id}/typing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    /// Conversation being typed in.
    pub conversation_id: String,
    /// Typing user, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// `true` while the user is typing.
    pub is_typing: bool,
}

/// Published to `/app/conversations/{id}/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// Message that was read.
    pub message_id: String,
    /// Reader.
    pub user_id: String,
    /// When it was read.
    pub timestamp: DateTime<Utc>,
}

/// Published to `/app/chat/{id}/read-bulk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReadReceipt {
    /// Messages that were read.
    pub message_ids: Vec<String>,
    /// Reader.
    pub user_id: String,
}
