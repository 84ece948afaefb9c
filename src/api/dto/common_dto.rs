//! Pagination parameters shared by list endpoints.

use serde::{Deserialize, Serialize};

/// Page of a conversation's message history.
///
/// `size` is clamped to the conversation class maximum before the request
/// is built, so two queries that differ only above the cap share a cache
/// entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    /// Zero-based page. Defaults to 0.
    #[serde(default)]
    pub page: u32,
    /// Requested page size. Defaults to 50.
    #[serde(default = "default_message_page_size")]
    pub size: u32,
    /// Only messages sent before this cursor.
    #[serde(default)]
    pub before: Option<String>,
    /// Drop the cached page before reading.
    #[serde(default)]
    pub force_refresh: bool,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            page: 0,
            size: default_message_page_size(),
            before: None,
            force_refresh: false,
        }
    }
}

impl MessageQuery {
    /// First page with the default size.
    #[must_use]
    pub fn first_page() -> Self {
        Self::default()
    }

    /// Page `page` with the default size.
    #[must_use]
    pub fn page(page: u32) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    /// Sets the requested page size.
    #[must_use]
    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Sets the pagination cursor.
    #[must_use]
    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    /// Bypasses the cached page.
    #[must_use]
    pub const fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

/// Pagination for conversation and notification lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageParams {
    /// Zero-based page. Defaults to 0.
    #[serde(default)]
    pub page: u32,
    /// Items per page. Defaults to 20.
    #[serde(default = "default_list_page_size")]
    pub size: u32,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: 0,
            size: default_list_page_size(),
        }
    }
}

fn default_message_page_size() -> u32 {
    50
}

fn default_list_page_size() -> u32 {
    20
}
