//! Destination names used by the chat backend.

/// Per-user notification queue.
pub const NOTIFICATIONS: &str = "/user/queue/notifications";

/// Inbound conversation events (new message, delete, typing, metadata).
#[must_use]
pub fn conversation(conversation_id: &str) -> String {
    format!("/topic/conversations/{conversation_id}")
}

/// Outbound typing-status publish.
#[must_use]
pub fn typing(conversation_id: &str) -> String {
    format!("/app/conversations/{conversation_id}/typing")
}

/// Outbound read-receipt publish.
#[must_use]
pub fn read_receipt(conversation_id: &str) -> String {
    format!("/app/conversations/{conversation_id}/read")
}

/// Outbound bulk read-receipt publish.
#[must_use]
pub fn bulk_read_receipt(conversation_id: &str) -> String {
    format!("/app/chat/{conversation_id}/read-bulk")
}
