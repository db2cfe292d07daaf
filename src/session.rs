//! Session lifecycle manager
//!
//! Owns which session the client is talking to and sequences creation and
//! turn submission:
//!
//! ```text
//! NoSession -> Creating -> Ready -> (Submitting -> Ready)* -> NoSession
//! ```
//!
//! A submission needs a non-empty prompt, a held session id, and no other
//! submission in flight. After every turn, successful or not, the session is
//! refetched and the derived [`RunResult`] recomputed. A failed session
//! fetch discards the session id so the next [`SessionManager::ensure_session`]
//! creates a new one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, watch};

use crate::api::client::{AgentApi, AgentClient};
use crate::api::types::{Message, RunRequest, Session};
use crate::cache::{SessionCache, SessionKey};
use crate::config::Config;
use crate::error::{transport_error, LgtmError, Result};
use crate::identity::{FixedId, IdProvider, RandomUserIds, UuidSessionIds};
use crate::reducer::RunResult;
use crate::stream::{self, StreamState};

/// Where the manager is in a session's lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    NoSession,
    Creating,
    Ready { session_id: String },
    Submitting { session_id: String },
}

impl LifecycleState {
    /// Held session id, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Ready { session_id } | Self::Submitting { session_id } => Some(session_id),
            Self::NoSession | Self::Creating => None,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Moves the state from `from` to `to` when dropped while armed, so an
/// abandoned operation does not leave the manager stuck mid-transition
struct Revert<'a> {
    state: &'a watch::Sender<LifecycleState>,
    from: LifecycleState,
    to: LifecycleState,
    armed: bool,
}

impl<'a> Revert<'a> {
    fn new(
        state: &'a watch::Sender<LifecycleState>,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Self {
        Self {
            state,
            from,
            to,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Revert<'_> {
    fn drop(&mut self) {
        if self.armed {
            let to = self.to.clone();
            let from = &self.from;
            self.state.send_if_modified(|s| {
                if s == from {
                    *s = to;
                    true
                } else {
                    false
                }
            });
        }
    }
}

enum Claim {
    Create,
    Wait,
    Have(String),
    Failed,
}

/// Drives one user's sessions against one agent app
pub struct SessionManager {
    api: Arc<dyn AgentApi>,
    sessions: SessionCache,
    app_name: String,
    user_id: String,
    session_ids: Option<Arc<dyn IdProvider>>,
    state: watch::Sender<LifecycleState>,
    view: Mutex<RunResult>,
    last_error: Mutex<Option<String>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("app_name", &self.app_name)
            .field("user_id", &self.user_id)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager for `app_name`; the user id is drawn once from
    /// `user_ids`
    pub fn new(
        api: Arc<dyn AgentApi>,
        app_name: impl Into<String>,
        user_ids: &dyn IdProvider,
        session_stale_after: Duration,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::NoSession);
        let user_id = user_ids.next_id();
        tracing::debug!(user = %user_id, "Using user id");
        Self {
            sessions: SessionCache::new(Arc::clone(&api), session_stale_after),
            api,
            app_name: app_name.into(),
            user_id,
            session_ids: None,
            state,
            view: Mutex::new(RunResult::empty()),
            last_error: Mutex::new(None),
        }
    }

    /// Manager configured from `config`
    ///
    /// Uses the configured user id, or a random per-launch one when unset.
    /// With `session.client_assigned_ids` sessions get client-side UUIDs.
    pub fn from_config(api: Arc<dyn AgentApi>, config: &Config) -> Self {
        let user_ids: Box<dyn IdProvider> = match &config.session.user_id {
            Some(id) => Box::new(FixedId(id.clone())),
            None => Box::new(RandomUserIds),
        };
        let manager = Self::new(
            api,
            config.session.app_name.clone(),
            user_ids.as_ref(),
            config.cache.session_stale_after(),
        );
        if config.session.client_assigned_ids {
            manager.with_session_ids(Arc::new(UuidSessionIds))
        } else {
            manager
        }
    }

    /// Assign session ids on the client instead of letting the backend
    /// choose
    pub fn with_session_ids(mut self, ids: Arc<dyn IdProvider>) -> Self {
        self.session_ids = Some(ids);
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state.borrow().clone()
    }

    /// Observe lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Held session id, if any
    pub fn session_id(&self) -> Option<String> {
        self.state.borrow().session_id().map(str::to_string)
    }

    /// Latest derived view of the current session
    pub fn view(&self) -> RunResult {
        lock(&self.view).clone()
    }

    /// Latest cached snapshot of the current session
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session_id()
            .and_then(|id| self.sessions.cached(&self.key(&id)))
    }

    /// Message of the most recent failure, for inline display
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    fn key(&self, session_id: &str) -> SessionKey {
        SessionKey::new(&self.app_name, &self.user_id, session_id)
    }

    fn record_error(&self, message: String) {
        *lock(&self.last_error) = Some(message);
    }

    fn transition_if(&self, from: &LifecycleState, to: LifecycleState) -> bool {
        self.state.send_if_modified(|s| {
            if s == from {
                tracing::debug!(from = ?s, to = ?to, "Lifecycle transition");
                *s = to;
                true
            } else {
                false
            }
        })
    }

    fn run_request(&self, session_id: &str, prompt: &str) -> RunRequest {
        RunRequest {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            session_id: session_id.to_string(),
            new_message: Message::user(prompt),
        }
    }

    /// Return the held session id, creating a session when none is held
    ///
    /// Concurrent callers share one creation. A failed creation leaves the
    /// manager in `NoSession` and fails every caller that waited on it;
    /// calling again afterwards retries.
    pub async fn ensure_session(&self) -> Result<String> {
        let mut changes = self.state.subscribe();
        let mut waited = false;
        loop {
            let mut claim = Claim::Wait;
            self.state.send_if_modified(|s| match s {
                LifecycleState::NoSession if waited => {
                    claim = Claim::Failed;
                    false
                }
                LifecycleState::NoSession => {
                    tracing::debug!(to = "creating", "Lifecycle transition");
                    *s = LifecycleState::Creating;
                    claim = Claim::Create;
                    true
                }
                LifecycleState::Creating => false,
                LifecycleState::Ready { session_id } | LifecycleState::Submitting { session_id } => {
                    claim = Claim::Have(session_id.clone());
                    false
                }
            });

            match claim {
                Claim::Have(id) => return Ok(id),
                Claim::Create => return self.create().await,
                Claim::Failed => {
                    let reason = self
                        .last_error()
                        .unwrap_or_else(|| "creation was abandoned".to_string());
                    return Err(anyhow::Error::from(LgtmError::NoSession)
                        .context(format!("session creation failed: {}", reason)));
                }
                Claim::Wait => {
                    waited = true;
                    changes.changed().await.map_err(|_| LgtmError::NoSession)?;
                }
            }
        }
    }

    async fn create(&self) -> Result<String> {
        let mut revert = Revert::new(
            &self.state,
            LifecycleState::Creating,
            LifecycleState::NoSession,
        );
        let requested = self.session_ids.as_ref().map(|ids| ids.next_id());

        let created = self
            .api
            .create_session(&self.app_name, &self.user_id, requested.as_deref())
            .await;
        revert.disarm();

        match created {
            Ok(session) => {
                let id = session.id.clone();
                *lock(&self.view) = RunResult::from_session(&session);
                *lock(&self.last_error) = None;
                self.sessions.seed(session);
                self.transition_if(
                    &LifecycleState::Creating,
                    LifecycleState::Ready {
                        session_id: id.clone(),
                    },
                );
                tracing::info!(session_id = %id, app = %self.app_name, "Session ready");
                Ok(id)
            }
            Err(e) => {
                tracing::warn!("Session creation failed: {}", e);
                self.transition_if(&LifecycleState::Creating, LifecycleState::NoSession);
                self.record_error(e.to_string());
                Err(e)
            }
        }
    }

    fn begin_submit(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(LgtmError::SubmissionRejected("prompt is empty".to_string()).into());
        }

        let mut outcome = Err(LgtmError::NoSession);
        self.state.send_if_modified(|s| match s {
            LifecycleState::Ready { session_id } => {
                let id = session_id.clone();
                outcome = Ok(id.clone());
                *s = LifecycleState::Submitting { session_id: id };
                true
            }
            LifecycleState::Submitting { .. } => {
                outcome = Err(LgtmError::SubmissionRejected(
                    "a turn is already in flight".to_string(),
                ));
                false
            }
            LifecycleState::NoSession | LifecycleState::Creating => false,
        });

        let session_id = outcome?;
        tracing::debug!(session_id = %session_id, to = "submitting", "Lifecycle transition");
        Ok(session_id)
    }

    /// Refetch after a turn and return to `Ready` unless the session was
    /// discarded meanwhile
    async fn finish_turn(&self, session_id: &str) -> Result<RunResult> {
        let refreshed = self.reload(session_id, true).await;
        self.transition_if(
            &LifecycleState::Submitting {
                session_id: session_id.to_string(),
            },
            LifecycleState::Ready {
                session_id: session_id.to_string(),
            },
        );
        refreshed
    }

    /// Submit one turn over the request/response endpoint
    ///
    /// # Errors
    ///
    /// Returns `SubmissionRejected` for an empty prompt or while another
    /// turn is in flight, `NoSession` without a session, the transport error
    /// of a failed turn, or `SessionFetch` when the refetch afterwards fails
    pub async fn submit(&self, prompt: &str) -> Result<RunResult> {
        let session_id = self.begin_submit(prompt)?;
        let mut revert = Revert::new(
            &self.state,
            LifecycleState::Submitting {
                session_id: session_id.clone(),
            },
            LifecycleState::Ready {
                session_id: session_id.clone(),
            },
        );

        tracing::info!(session_id = %session_id, "Submitting turn");
        let turn = self
            .api
            .run_turn(&self.run_request(&session_id, prompt))
            .await;
        if let Err(e) = &turn {
            tracing::warn!(session_id = %session_id, "Turn failed: {}", e);
            self.record_error(e.to_string());
        }

        let refreshed = self.finish_turn(&session_id).await;
        revert.disarm();

        turn?;
        refreshed
    }

    /// Submit one turn through the event stream controller
    ///
    /// `on_message` receives every raw stream payload. Completion is the
    /// channel closing; the session is then refetched exactly as after
    /// [`SessionManager::submit`].
    pub async fn submit_streaming<M>(
        &self,
        client: &AgentClient,
        prompt: &str,
        on_message: M,
    ) -> Result<RunResult>
    where
        M: FnMut(String) + Send + 'static,
    {
        let session_id = self.begin_submit(prompt)?;
        let mut revert = Revert::new(
            &self.state,
            LifecycleState::Submitting {
                session_id: session_id.clone(),
            },
            LifecycleState::Ready {
                session_id: session_id.clone(),
            },
        );

        let (error_tx, mut error_rx) = oneshot::channel();
        let mut handle = stream::open(
            client,
            self.run_request(&session_id, prompt),
            on_message,
            move |e| {
                let _ = error_tx.send(e);
            },
        );
        let _close_on_drop = handle.closed().drop_guard();

        tracing::info!(session_id = %session_id, "Submitting streamed turn");
        let final_state = handle.wait().await;
        let stream_error = error_rx.try_recv().ok();
        if let Some(e) = &stream_error {
            self.record_error(e.to_string());
        }
        tracing::debug!(state = ?final_state, "Stream finished");

        let refreshed = self.finish_turn(&session_id).await;
        revert.disarm();

        match stream_error {
            Some(e) => Err(e.into()),
            None if final_state == StreamState::Errored => {
                Err(LgtmError::Stream("stream ended with an error".to_string()).into())
            }
            None => refreshed,
        }
    }

    /// Re-read the current session, honouring the staleness window
    ///
    /// A failed fetch discards the session id and clears the view.
    pub async fn refresh(&self) -> Result<RunResult> {
        let session_id = self.session_id().ok_or(LgtmError::NoSession)?;
        self.reload(&session_id, false).await
    }

    async fn reload(&self, session_id: &str, force: bool) -> Result<RunResult> {
        let key = self.key(session_id);
        let fetched = if force {
            self.sessions.refetch(&key).await
        } else {
            self.sessions.get(&key).await
        };

        match fetched {
            Ok(session) => {
                let result = RunResult::from_session(&session);
                if self.state.borrow().session_id() == Some(session_id) {
                    *lock(&self.view) = result.clone();
                }
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(session_id, "Session fetch failed, discarding session: {}", e);
                let discarded = self.state.send_if_modified(|s| {
                    if s.session_id() == Some(session_id) {
                        *s = LifecycleState::NoSession;
                        true
                    } else {
                        false
                    }
                });
                if discarded {
                    *lock(&self.view) = RunResult::empty();
                    self.sessions.remove(&key);
                }
                let err = LgtmError::SessionFetch {
                    session_id: session_id.to_string(),
                    message: e.to_string(),
                    transport: transport_error(&e).cloned(),
                };
                self.record_error(err.to_string());
                Err(err.into())
            }
        }
    }

    /// Drop the current session and its derived view
    ///
    /// The session is not deleted on the backend.
    pub fn reset(&self) {
        let previous = self.state.send_replace(LifecycleState::NoSession);
        if let Some(id) = previous.session_id() {
            self.sessions.remove(&self.key(id));
        }
        *lock(&self.view) = RunResult::empty();
        *lock(&self.last_error) = None;
        tracing::info!("Session reset");
    }
}
