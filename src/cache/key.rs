//! Cache keys.

use std::fmt;

/// Identity of one cached page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Logical endpoint (`"messages"`).
    pub endpoint: String,
    /// Owning resource (a conversation id); invalidation works on this.
    pub resource_id: String,
    /// Zero-based page.
    pub page: u32,
    /// Effective page size, after class clamping.
    pub page_size: u32,
    /// Pagination cursor.
    pub before: Option<String>,
}

impl CacheKey {
    /// Key for a page of a conversation's message history.
    #[must_use]
    pub fn messages(
        conversation_id: &str,
        page: u32,
        page_size: u32,
        before: Option<&str>,
    ) -> Self {
        Self {
            endpoint: "messages".to_string(),
            resource_id: conversation_id.to_string(),
            page,
            page_size,
            before: before.map(str::to_string),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.endpoint,
            self.resource_id,
            self.page,
            self.page_size,
            self.before.as_deref().unwrap_or_default()
        )
    }
}
