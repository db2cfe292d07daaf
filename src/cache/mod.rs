//! Keyed query cache with staleness and request coalescing
//!
//! [`QueryCache`] holds the latest fetched value per key together with
//! when it was fetched. A read returns the cached value while it is fresh;
//! otherwise it fetches. At most one fetch per key is in flight: concurrent
//! readers of the same key await the same shared future and observe the
//! same result.
//!
//! Values are stored behind `Arc` and swapped whole, so a reader never sees
//! a partially updated value.
//!
//! Invalidation marks the entry stale right away and detaches any fetch
//! that was already running, so the next read starts a new fetch. A
//! detached fetch may still store its value, but the entry stays stale.

pub mod stores;

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::error::{Result, SharedError};

pub use stores::{AppsCache, ImageHistory, SessionCache, SessionKey};

/// Outcome shared by every reader of one fetch
pub type FetchOutcome<V> = std::result::Result<Arc<V>, SharedError>;

type InFlight<V> = Shared<BoxFuture<'static, FetchOutcome<V>>>;

struct Entry<V> {
    value: Option<Arc<V>>,
    fetched_at: Option<Instant>,
    last_error: Option<SharedError>,
    generation: u64,
    in_flight: Option<InFlight<V>>,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            value: None,
            fetched_at: None,
            last_error: None,
            generation: 0,
            in_flight: None,
        }
    }
}

impl<V> Entry<V> {
    fn fresh_value(&self, stale_after: Duration) -> Option<Arc<V>> {
        match (&self.value, self.fetched_at) {
            (Some(v), Some(at)) if at.elapsed() < stale_after => Some(Arc::clone(v)),
            _ => None,
        }
    }

    fn detach(&mut self) {
        self.fetched_at = None;
        self.generation += 1;
        self.in_flight = None;
    }
}

/// Keyed, coalescing cache
pub struct QueryCache<K, V> {
    entries: Arc<Mutex<HashMap<K, Entry<V>>>>,
    stale_after: Duration,
}

impl<K, V> Clone for QueryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            stale_after: self.stale_after,
        }
    }
}

impl<K, V> std::fmt::Debug for QueryCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

fn lock<K, V>(entries: &Mutex<HashMap<K, Entry<V>>>) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a cache whose values stay fresh for `stale_after`
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            stale_after,
        }
    }

    /// Staleness window
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Return the fresh cached value, or join/start a fetch for `key`
    ///
    /// `fetch` is only called when a new fetch has to start.
    pub async fn get<F, Fut>(&self, key: K, fetch: F) -> FetchOutcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let in_flight = {
            let mut entries = lock(&self.entries);
            let entry = entries.entry(key.clone()).or_default();
            if let Some(value) = entry.fresh_value(self.stale_after) {
                return Ok(value);
            }
            match &entry.in_flight {
                Some(shared) => {
                    tracing::debug!("Joining in-flight fetch");
                    shared.clone()
                }
                None => self.start_fetch(entry, key, fetch()),
            }
        };
        in_flight.await
    }

    /// Mark `key` stale and fetch it, regardless of freshness
    pub async fn refetch<F, Fut>(&self, key: K, fetch: F) -> FetchOutcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.invalidate(&key);
        self.get(key, fetch).await
    }

    fn start_fetch<Fut>(&self, entry: &mut Entry<V>, key: K, fetch: Fut) -> InFlight<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let generation = entry.generation;
        let entries = Arc::clone(&self.entries);

        let shared = async move {
            let outcome: FetchOutcome<V> = fetch.await.map(Arc::new).map_err(Arc::new);

            let mut entries = lock(&entries);
            if let Some(entry) = entries.get_mut(&key) {
                if entry.generation == generation {
                    entry.in_flight = None;
                    match &outcome {
                        Ok(value) => {
                            entry.value = Some(Arc::clone(value));
                            entry.fetched_at = Some(Instant::now());
                            entry.last_error = None;
                        }
                        Err(err) => entry.last_error = Some(Arc::clone(err)),
                    }
                } else if let Ok(value) = &outcome {
                    tracing::debug!("Fetch finished after invalidation; keeping entry stale");
                    entry.value = Some(Arc::clone(value));
                }
            }
            outcome
        }
        .boxed()
        .shared();

        entry.in_flight = Some(shared.clone());
        shared
    }

    /// Latest stored value, fresh or not
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        lock(&self.entries).get(key).and_then(|e| e.value.clone())
    }

    /// Store `value` as freshly fetched, detaching any running fetch
    pub fn put(&self, key: K, value: V) {
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key).or_default();
        entry.detach();
        entry.value = Some(Arc::new(value));
        entry.fetched_at = Some(Instant::now());
        entry.last_error = None;
    }

    /// Mark `key` stale so the next read fetches
    pub fn invalidate(&self, key: &K) {
        if let Some(entry) = lock(&self.entries).get_mut(key) {
            entry.detach();
        }
    }

    /// Drop everything cached for `key`
    pub fn remove(&self, key: &K) {
        lock(&self.entries).remove(key);
    }

    /// True when a read of `key` would fetch
    pub fn is_stale(&self, key: &K) -> bool {
        lock(&self.entries)
            .get(key)
            .map_or(true, |e| e.fresh_value(self.stale_after).is_none())
    }

    /// Error of the most recent fetch for `key`, cleared by a success
    pub fn last_error(&self, key: &K) -> Option<SharedError> {
        lock(&self.entries)
            .get(key)
            .and_then(|e| e.last_error.clone())
    }
}
