//! Response cache and request coalescer for paginated reads.
//!
//! Entries are keyed by [`CacheKey`] and age through three phases (see
//! [`Freshness`]): fresh entries are returned directly, stale ones are
//! returned while one background refresh runs, and expired ones are
//! refetched with the old payload kept as an error fallback. TTL and page
//! size depend on the conversation's [`ResourceClass`].

pub mod key;
pub mod policy;
pub mod store;

pub use key::CacheKey;
pub use policy::{Freshness, ResourceClass};
pub use store::{Lookup, ResponseCache};
