//! Per-resource-class cache policy and entry freshness.

use std::time::Duration;

use serde::Serialize;

use crate::config::{CacheConfig, ClassPolicy};

/// Conversation class; decides TTL, page size and fetch timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// One-to-one conversation.
    Direct,
    /// Multi-party conversation (id prefixed with `group_`).
    Group,
}

impl ResourceClass {
    /// Classifies a conversation id.
    #[must_use]
    pub fn of(conversation_id: &str) -> Self {
        if conversation_id.starts_with("group_") {
            Self::Group
        } else {
            Self::Direct
        }
    }
}

impl CacheConfig {
    /// Policy for `class`.
    #[must_use]
    pub const fn policy(&self, class: ResourceClass) -> ClassPolicy {
        match class {
            ResourceClass::Direct => self.direct,
            ResourceClass::Group => self.group,
        }
    }
}

impl ClassPolicy {
    /// Requested page size clamped to the class maximum (and at least 1).
    #[must_use]
    pub fn clamp_page_size(&self, requested: u32) -> u32 {
        requested.clamp(1, self.page_size.max(1))
    }
}

/// Where an entry sits in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than half the TTL: served as is.
    Fresh,
    /// In the second half of the TTL: served, refreshed in the background.
    Stale,
    /// At or past the TTL: refetched, kept only as an error fallback.
    Expired,
}

impl Freshness {
    /// Classifies an entry of `age` with time-to-live `ttl`.
    #[must_use]
    pub fn of(age: Duration, ttl: Duration) -> Self {
        if age < ttl / 2 {
            Self::Fresh
        } else if age < ttl {
            Self::Stale
        } else {
            Self::Expired
        }
    }
}
