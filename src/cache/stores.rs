//! Caches over the agent backend: sessions, apps, and image history

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{FetchOutcome, QueryCache};
use crate::api::client::AgentApi;
use crate::api::types::{AppInfo, ImageHistoryEntry, Session};
use crate::error::{Result, SharedError};

/// Identity of a cached session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Key under which `session` is cached
    pub fn of(session: &Session) -> Self {
        Self::new(&session.app_name, &session.user_id, &session.id)
    }
}

/// Latest fetched [`Session`] per [`SessionKey`]
///
/// Reads within the staleness window are served from memory; concurrent
/// reads of a stale or missing key share one `get_session` call.
#[derive(Clone)]
pub struct SessionCache {
    api: Arc<dyn AgentApi>,
    cache: QueryCache<SessionKey, Session>,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SessionCache {
    pub fn new(api: Arc<dyn AgentApi>, stale_after: Duration) -> Self {
        Self {
            api,
            cache: QueryCache::new(stale_after),
        }
    }

    fn fetcher(&self, key: &SessionKey) -> impl FnOnce() -> BoxFuture<'static, Result<Session>> {
        let api = Arc::clone(&self.api);
        let key = key.clone();
        move || {
            async move {
                api.get_session(&key.app_name, &key.user_id, &key.session_id)
                    .await
            }
            .boxed()
        }
    }

    /// Cached session if fresh, otherwise a (shared) fetch
    pub async fn get(&self, key: &SessionKey) -> FetchOutcome<Session> {
        self.cache.get(key.clone(), self.fetcher(key)).await
    }

    /// Fetch `key` now, ignoring freshness
    pub async fn refetch(&self, key: &SessionKey) -> FetchOutcome<Session> {
        tracing::debug!(session_id = %key.session_id, "Refetching session");
        self.cache.refetch(key.clone(), self.fetcher(key)).await
    }

    /// Mark `key` stale
    pub fn invalidate(&self, key: &SessionKey) {
        self.cache.invalidate(key);
    }

    /// Store a session obtained elsewhere (for example from creation)
    pub fn seed(&self, session: Session) {
        self.cache.put(SessionKey::of(&session), session);
    }

    /// Latest stored snapshot without fetching
    pub fn cached(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.cache.peek(key)
    }

    pub fn is_stale(&self, key: &SessionKey) -> bool {
        self.cache.is_stale(key)
    }

    pub fn remove(&self, key: &SessionKey) {
        self.cache.remove(key);
    }

    /// Error marker left by the most recent failed fetch
    pub fn last_error(&self, key: &SessionKey) -> Option<SharedError> {
        self.cache.last_error(key)
    }
}

/// App listing, refreshed when older than its staleness window
#[derive(Clone)]
pub struct AppsCache {
    api: Arc<dyn AgentApi>,
    cache: QueryCache<(), Vec<AppInfo>>,
}

impl AppsCache {
    pub fn new(api: Arc<dyn AgentApi>, stale_after: Duration) -> Self {
        Self {
            api,
            cache: QueryCache::new(stale_after),
        }
    }

    fn fetcher(&self) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<AppInfo>>> {
        let api = Arc::clone(&self.api);
        move || async move { api.list_apps().await }.boxed()
    }

    pub async fn list(&self) -> FetchOutcome<Vec<AppInfo>> {
        self.cache.get((), self.fetcher()).await
    }

    pub async fn refetch(&self) -> FetchOutcome<Vec<AppInfo>> {
        self.cache.refetch((), self.fetcher()).await
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&());
    }
}

type ImageList = Arc<Vec<ImageHistoryEntry>>;

/// Image history listing with an optional periodic refresh
///
/// Every successful fetch is published to subscribers; a failed fetch is
/// kept as an error marker and leaves the last published list in place.
pub struct ImageHistory {
    api: Arc<dyn AgentApi>,
    cache: QueryCache<(), Vec<ImageHistoryEntry>>,
    updates: watch::Sender<Option<ImageList>>,
    refresh_interval: Duration,
}

impl std::fmt::Debug for ImageHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHistory")
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

impl ImageHistory {
    /// Listing considered fresh for `refresh_interval`
    pub fn new(api: Arc<dyn AgentApi>, refresh_interval: Duration) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            api,
            cache: QueryCache::new(refresh_interval),
            updates,
            refresh_interval,
        }
    }

    fn fetcher(&self) -> impl FnOnce() -> BoxFuture<'static, Result<Vec<ImageHistoryEntry>>> {
        let api = Arc::clone(&self.api);
        move || async move { api.list_images().await }.boxed()
    }

    fn publish(&self, outcome: &FetchOutcome<Vec<ImageHistoryEntry>>) {
        if let Ok(images) = outcome {
            self.updates.send_replace(Some(Arc::clone(images)));
        }
    }

    /// Current listing, fetching when stale
    pub async fn list(&self) -> FetchOutcome<Vec<ImageHistoryEntry>> {
        let outcome = self.cache.get((), self.fetcher()).await;
        self.publish(&outcome);
        outcome
    }

    /// Fetch the listing now
    pub async fn refetch(&self) -> FetchOutcome<Vec<ImageHistoryEntry>> {
        let outcome = self.cache.refetch((), self.fetcher()).await;
        self.publish(&outcome);
        outcome
    }

    /// Receive every listing published from now on
    pub fn subscribe(&self) -> watch::Receiver<Option<ImageList>> {
        self.updates.subscribe()
    }

    pub fn last_error(&self) -> Option<SharedError> {
        self.cache.last_error(&())
    }

    /// Refetch immediately and then once per refresh interval until `cancel`
    /// fires
    pub fn spawn_refresh(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Image history refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = this.refetch().await {
                            tracing::warn!("Image history refresh failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
