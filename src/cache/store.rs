//! TTL cache with stale-while-revalidate and in-flight coalescing.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::time::Instant;

use super::key::CacheKey;
use super::policy::Freshness;
use crate::error::ClientError;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, ClientError>>>;

struct CacheEntry<V> {
    payload: V,
    stored_at: Instant,
    ttl: Duration,
}

struct PendingRequest<V> {
    id: u64,
    fetch: SharedFetch<V>,
    background: bool,
}

struct State<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    pending: HashMap<CacheKey, PendingRequest<V>>,
    next_id: u64,
}

/// What the cache holds for a key right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// Younger than half its TTL.
    Fresh(V),
    /// In the second half of its TTL.
    Stale(V),
    /// Past its TTL; only usable as an error fallback.
    Expired(V),
    /// Nothing cached.
    Miss,
}

/// Drops the pending marker of fetch `id` when its task ends, including
/// by panic or abort. A no-op once the task has settled normally.
struct PendingRelease<V> {
    state: Arc<Mutex<State<V>>>,
    key: CacheKey,
    id: u64,
}

impl<V> Drop for PendingRelease<V> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if state.pending.get(&self.key).is_some_and(|p| p.id == self.id) {
            state.pending.remove(&self.key);
            tracing::warn!(key = %self.key, "fetch task ended without a result");
        }
    }
}

enum Plan<V> {
    Ready(V),
    Await {
        fetch: SharedFetch<V>,
        fallback: Option<V>,
    },
}

/// Keyed response cache.
///
/// Reads for one key are served from a fresh entry, served stale while a
/// single background refresh runs, or fetched. Concurrent reads of a key
/// share one underlying fetch. Fetches run as detached tasks, so a caller
/// that stops waiting does not cancel the fetch for the others.
///
/// Cheap to clone; clones share entries.
pub struct ResponseCache<V> {
    state: Arc<Mutex<State<V>>>,
}

impl<V> Clone for ResponseCache<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V> fmt::Debug for ResponseCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ResponseCache")
            .field("entries", &state.entries.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl<V> Default for ResponseCache<V> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                pending: HashMap::new(),
                next_id: 0,
            })),
        }
    }
}

fn lock<V>(state: &Mutex<State<V>>) -> MutexGuard<'_, State<V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, fetching with `fetch` when needed.
    ///
    /// `fetch` is called at most once, synchronously, and only when this
    /// call starts a network request; it must not call back into the cache.
    /// A successful result is stored with `ttl`.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when there is no cached entry to fall back
    /// on. Coalesced callers all receive the same error.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ClientError>> + Send + 'static,
    {
        let plan = self.plan(key, ttl, fetch);
        match plan {
            Plan::Ready(value) => Ok(value),
            Plan::Await { fetch, fallback } => match fetch.await {
                Ok(value) => Ok(value),
                Err(err) => match fallback {
                    Some(value) => {
                        tracing::warn!(%key, error = %err, "fetch failed; serving cached entry");
                        Ok(value)
                    }
                    None => Err(err),
                },
            },
        }
    }

    fn plan<F, Fut>(&self, key: &CacheKey, ttl: Duration, fetch: F) -> Plan<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ClientError>> + Send + 'static,
    {
        let mut state = lock(&self.state);
        let now = Instant::now();
        let entry = state.entries.get(key).map(|e| {
            (
                e.payload.clone(),
                Freshness::of(now.duration_since(e.stored_at), e.ttl),
            )
        });

        if let Some(pending) = state.pending.get(key) {
            return match entry {
                Some((value, Freshness::Fresh | Freshness::Stale)) if pending.background => {
                    Plan::Ready(value)
                }
                entry => {
                    tracing::debug!(%key, "joining in-flight fetch");
                    Plan::Await {
                        fetch: pending.fetch.clone(),
                        fallback: entry.map(|(value, _)| value),
                    }
                }
            };
        }

        match entry {
            Some((value, Freshness::Fresh)) => Plan::Ready(value),
            Some((value, Freshness::Stale)) => {
                tracing::debug!(%key, "serving stale entry; refreshing in background");
                self.start(&mut state, key, ttl, fetch, true);
                Plan::Ready(value)
            }
            Some((value, Freshness::Expired)) => Plan::Await {
                fetch: self.start(&mut state, key, ttl, fetch, false),
                fallback: Some(value),
            },
            None => Plan::Await {
                fetch: self.start(&mut state, key, ttl, fetch, false),
                fallback: None,
            },
        }
    }

    fn start<F, Fut>(
        &self,
        state: &mut State<V>,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
        background: bool,
    ) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ClientError>> + Send + 'static,
    {
        state.next_id += 1;
        let id = state.next_id;
        let shared_state = Arc::clone(&self.state);
        let store_key = key.clone();
        let request = fetch();

        let task = tokio::spawn(async move {
            let _release = PendingRelease {
                state: Arc::clone(&shared_state),
                key: store_key.clone(),
                id,
            };
            let result = request.await;
            let mut state = lock(&shared_state);
            let current = state.pending.get(&store_key).is_some_and(|p| p.id == id);
            if current {
                state.pending.remove(&store_key);
                match &result {
                    Ok(value) => {
                        state.entries.insert(
                            store_key,
                            CacheEntry {
                                payload: value.clone(),
                                stored_at: Instant::now(),
                                ttl,
                            },
                        );
                    }
                    Err(err) => tracing::warn!(key = %store_key, background, error = %err, "fetch failed"),
                }
            } else {
                tracing::debug!(key = %store_key, "discarding result of detached fetch");
            }
            result
        });

        let shared = async move {
            task.await
                .unwrap_or_else(|e| Err(ClientError::Internal(format!("cache fetch task: {e}"))))
        }
        .boxed()
        .shared();
        state.pending.insert(
            key.clone(),
            PendingRequest {
                id,
                fetch: shared.clone(),
                background,
            },
        );
        tracing::debug!(%key, background, "fetch started");
        shared
    }

    /// Current cache content for `key`, without fetching.
    #[must_use]
    pub fn lookup(&self, key: &CacheKey) -> Lookup<V> {
        let state = lock(&self.state);
        match state.entries.get(key) {
            None => Lookup::Miss,
            Some(entry) => {
                let value = entry.payload.clone();
                match Freshness::of(entry.stored_at.elapsed(), entry.ttl) {
                    Freshness::Fresh => Lookup::Fresh(value),
                    Freshness::Stale => Lookup::Stale(value),
                    Freshness::Expired => Lookup::Expired(value),
                }
            }
        }
    }

    /// Drops every entry of `resource_id` and detaches its in-flight
    /// fetches, whose results will then not be stored. Returns the number
    /// of entries dropped.
    pub fn invalidate_resource(&self, resource_id: &str) -> usize {
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|k, _| k.resource_id != resource_id);
        let removed = before - state.entries.len();
        let pending_before = state.pending.len();
        state.pending.retain(|k, _| k.resource_id != resource_id);
        let detached = pending_before - state.pending.len();
        tracing::debug!(resource_id, removed, detached, "cache invalidated");
        removed
    }

    /// Drops the entry for `key` and detaches its in-flight fetch.
    pub fn invalidate_key(&self, key: &CacheKey) -> bool {
        let mut state = lock(&self.state);
        state.pending.remove(key);
        state.entries.remove(key).is_some()
    }

    /// Drops everything.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.pending.clear();
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    /// `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }

    /// Number of fetches in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio_test::{assert_pending, task};

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    struct Source {
        calls: Arc<AtomicU32>,
        latency: Duration,
    }

    impl Source {
        fn new(latency: Duration) -> Self {
            Self {
                calls: Arc::new(AtomicU32::new(0)),
                latency,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        /// Fetch returning the call number.
        fn ok(&self) -> impl FnOnce() -> BoxFuture<'static, Result<u32, ClientError>> + use<> {
            let calls = Arc::clone(&self.calls);
            let latency = self.latency;
            move || {
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(latency).await;
                    Ok(n)
                }
                .boxed()
            }
        }

        fn failing(&self) -> impl FnOnce() -> BoxFuture<'static, Result<u32, ClientError>> + use<> {
            let calls = Arc::clone(&self.calls);
            let latency = self.latency;
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(latency).await;
                    Err(ClientError::network("offline"))
                }
                .boxed()
            }
        }
    }

    fn key() -> CacheKey {
        CacheKey::messages("c1", 0, 50, None)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let cache = ResponseCache::new();
        let source = Source::new(Duration::from_millis(200));
        let k = key();

        let mut first = task::spawn(cache.get_or_fetch(&k, TTL, source.ok()));
        assert_pending!(first.poll());
        assert_eq!(cache.pending_count(), 1);

        let second = cache.get_or_fetch(&k, TTL, source.ok());
        let (a, b) = tokio::join!(first, second);
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(1));
        assert_eq!(source.calls(), 1);
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.lookup(&k), Lookup::Fresh(1));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_served_without_fetch() {
        let cache = ResponseCache::new();
        let source = Source::new(Duration::ZERO);
        let k = key();
        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(1));

        tokio::time::sleep(TTL * 4 / 10).await;
        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(1));
        settle().await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_triggers_exactly_one_background_refresh() {
        let cache = ResponseCache::new();
        let source = Source::new(Duration::from_millis(100));
        let k = key();
        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(1));

        tokio::time::sleep(TTL * 6 / 10).await;
        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(1));
        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(1));
        assert_eq!(cache.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        settle().await;
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.lookup(&k), Lookup::Fresh(2));
        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched_with_stale_fallback() {
        let cache = ResponseCache::new();
        let source = Source::new(Duration::ZERO);
        let k = key();
        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(1));

        tokio::time::sleep(TTL).await;
        assert_eq!(cache.get_or_fetch(&k, TTL, source.failing()).await, Ok(1));
        assert_eq!(cache.pending_count(), 0);
        assert!(matches!(cache.lookup(&k), Lookup::Expired(1)));

        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(3));
        assert_eq!(cache.lookup(&k), Lookup::Fresh(3));
    }

    #[tokio::test(start_paused = true)]
    async fn miss_with_error_propagates_and_clears_pending() {
        let cache: ResponseCache<u32> = ResponseCache::new();
        let source = Source::new(Duration::ZERO);
        let k = key();
        let result = cache.get_or_fetch(&k, TTL, source.failing()).await;
        assert!(matches!(result, Err(ClientError::Request { .. })));
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.lookup(&k), Lookup::Miss);

        assert_eq!(cache.get_or_fetch(&k, TTL, source.ok()).await, Ok(2));
    }

    #[tokio::test]
    async fn panicking_fetch_does_not_block_the_key() {
        let cache: ResponseCache<u32> = ResponseCache::new();
        let k = key();
        let blow_up = true;
        let result = cache
            .get_or_fetch(&k, TTL, move || {
                async move {
                    if blow_up {
                        panic!("fetch blew up");
                    }
                    Ok(0)
                }
                .boxed()
            })
            .await;
        assert!(matches!(result, Err(ClientError::Internal(_))));
        assert_eq!(cache.pending_count(), 0);

        let retry = cache.get_or_fetch(&k, TTL, || async { Ok(7) }.boxed()).await;
        assert_eq!(retry, Ok(7));
        assert!(matches!(cache.lookup(&k), Lookup::Fresh(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_forces_next_read_to_fetch() {
        let cache = ResponseCache::new();
        let source = Source::new(Duration::ZERO);
        let page0 = key();
        let page1 = CacheKey::messages("c1", 1, 50, None);
        let other = CacheKey::messages("c2", 0, 50, None);
        for k in [&page0, &page1, &other] {
            assert!(cache.get_or_fetch(k, TTL, source.ok()).await.is_ok());
        }

        assert_eq!(cache.invalidate_resource("c1"), 2);
        assert_eq!(cache.lookup(&page0), Lookup::Miss);
        assert!(matches!(cache.lookup(&other), Lookup::Fresh(_)));

        assert_eq!(cache.get_or_fetch(&page0, TTL, source.ok()).await, Ok(4));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidation_detaches_in_flight_fetch() {
        let cache = ResponseCache::new();
        let source = Source::new(Duration::from_millis(500));
        let k = key();

        let mut reader = task::spawn(cache.get_or_fetch(&k, TTL, source.ok()));
        assert_pending!(reader.poll());
        cache.invalidate_resource("c1");
        assert_eq!(cache.pending_count(), 0);

        assert_eq!(reader.await, Ok(1));
        assert_eq!(cache.lookup(&k), Lookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn joiner_of_failed_fetch_gets_same_error() {
        let cache: ResponseCache<u32> = ResponseCache::new();
        let source = Source::new(Duration::from_millis(50));
        let k = key();
        let mut first = task::spawn(cache.get_or_fetch(&k, TTL, source.failing()));
        assert_pending!(first.poll());
        let second = cache.get_or_fetch(&k, TTL, source.ok());
        let (a, b) = tokio::join!(first, second);
        assert!(a.is_err());
        assert_eq!(a, b);
        assert_eq!(source.calls(), 1);
    }
}
