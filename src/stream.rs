//! Event stream controller
//!
//! A streamed run has two halves that are only correlated by sharing the
//! `run_sse` endpoint: a long-lived event channel (`GET`) and the request
//! that triggers the run (`POST`). [`open`] starts both as independent tasks
//! and returns a [`StreamHandle`]. Messages may arrive before the trigger
//! resolves; nothing here orders one against the other.
//!
//! State machine:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> { Closed | Errored }
//! ```
//!
//! - the first message moves `Connecting` to `Streaming`
//! - a failure of either half moves to `Errored`, closes the channel and
//!   reports the error once, even when both halves fail
//! - [`StreamHandle::cancel`] moves to `Closed` and never reports an error
//! - the channel ending on its own moves to `Closed`
//! - once the trigger is accepted, silence longer than the client's stream
//!   idle timeout moves to `Errored`
//!
//! Only one streamed run per session should be open at a time: payloads
//! carry no run id, so overlapping runs could not be told apart.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::client::AgentClient;
use crate::api::sse::pump_sse_stream;
use crate::api::types::RunRequest;
use crate::error::LgtmError;

/// Lifecycle of one streamed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Not opened yet
    Idle,
    /// Channel requested, no message received
    Connecting,
    /// At least one message received
    Streaming,
    /// Cancelled or ended normally
    Closed,
    /// A transport failure ended the run
    Errored,
}

impl StreamState {
    /// True for `Closed` and `Errored`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

type ErrorCallback = Box<dyn FnOnce(LgtmError) + Send>;

struct Shared {
    state: Mutex<StreamState>,
    on_error: Mutex<Option<ErrorCallback>>,
    /// Held for the whole of each message delivery and by `cancel`
    delivery: Mutex<()>,
    last_activity: Mutex<Instant>,
    cancel: CancellationToken,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(on_error: ErrorCallback) -> Self {
        Self {
            state: Mutex::new(StreamState::Idle),
            on_error: Mutex::new(Some(on_error)),
            delivery: Mutex::new(()),
            last_activity: Mutex::new(Instant::now()),
            cancel: CancellationToken::new(),
        }
    }

    fn state(&self) -> StreamState {
        *lock(&self.state)
    }

    fn connecting(&self) {
        let mut state = lock(&self.state);
        if *state == StreamState::Idle {
            *state = StreamState::Connecting;
        }
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn idle_deadline(&self, idle: Duration) -> Instant {
        *lock(&self.last_activity) + idle
    }

    /// Hand one payload to `on_message` unless the run is already over
    fn deliver<M: FnMut(String)>(&self, payload: String, on_message: &mut M) {
        let _delivering = lock(&self.delivery);
        if self.accept_message() {
            self.touch();
            on_message(payload);
        }
    }

    /// Caller-initiated close; waits out a delivery in progress
    fn cancel(&self) {
        let _delivering = lock(&self.delivery);
        self.close();
    }

    /// Whether a received message should reach the caller
    fn accept_message(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            StreamState::Connecting => {
                tracing::debug!(state = "streaming", "First stream message received");
                *state = StreamState::Streaming;
                true
            }
            StreamState::Streaming => true,
            _ => false,
        }
    }

    /// Move to a terminal state, returning the error callback if this call
    /// made the transition
    fn terminate(&self, to: StreamState) -> Option<ErrorCallback> {
        let callback = {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                return None;
            }
            *state = to;
            lock(&self.on_error).take()
        };
        self.cancel.cancel();
        callback
    }

    fn fail(&self, err: LgtmError) {
        if let Some(callback) = self.terminate(StreamState::Errored) {
            tracing::warn!("Stream failed: {}", err);
            callback(err);
        }
    }

    fn close(&self) {
        if self.terminate(StreamState::Closed).is_some() {
            tracing::debug!(state = "closed", "Stream closed");
        }
    }
}

fn into_lgtm(err: anyhow::Error) -> LgtmError {
    err.downcast::<LgtmError>()
        .unwrap_or_else(|e| LgtmError::Stream(e.to_string()))
}

/// Handle to an open streamed run
pub struct StreamHandle {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    /// Close the channel; safe to call any number of times, in any state
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Current state
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Token cancelled whenever the run reaches a terminal state
    pub fn closed(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Wait for both halves to finish and return the final state
    pub async fn wait(&mut self) -> StreamState {
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!("Stream task ended abnormally: {}", e);
            }
        }
        self.shared.state()
    }
}

/// Start a streamed run
///
/// `on_message` receives each event payload as the raw string it arrived
/// as. `on_error` is called at most once. Neither is called after
/// [`StreamHandle::cancel`] returns; a delivery in progress finishes before
/// `cancel` does, so `on_message` must not itself call `cancel`.
///
/// Must be called from within a Tokio runtime.
pub fn open<M, E>(
    client: &AgentClient,
    request: RunRequest,
    on_message: M,
    on_error: E,
) -> StreamHandle
where
    M: FnMut(String) + Send + 'static,
    E: FnOnce(LgtmError) + Send + 'static,
{
    let shared = Arc::new(Shared::new(Box::new(on_error)));
    shared.connecting();
    tracing::debug!(session_id = %request.session_id, state = "connecting", "Opening stream");

    let channel = tokio::spawn(run_channel(client.clone(), Arc::clone(&shared), on_message));
    let trigger = tokio::spawn(run_trigger(client.clone(), request, Arc::clone(&shared)));

    StreamHandle {
        shared,
        tasks: vec![channel, trigger],
    }
}

async fn run_channel<M>(client: AgentClient, shared: Arc<Shared>, mut on_message: M)
where
    M: FnMut(String) + Send + 'static,
{
    let opened = tokio::select! {
        _ = shared.cancel.cancelled() => return,
        opened = client.open_event_channel() => opened,
    };
    let response = match opened {
        Ok(response) => response,
        Err(e) => {
            shared.fail(into_lgtm(e));
            return;
        }
    };

    let pump = pump_sse_stream(response.bytes_stream(), |event| {
        shared.deliver(event.data, &mut on_message);
    });

    tokio::select! {
        _ = shared.cancel.cancelled() => {}
        pumped = pump => match pumped {
            Ok(()) => {
                tracing::debug!("Event channel ended");
                shared.close();
            }
            Err(e) => shared.fail(LgtmError::Stream(format!("event channel failed: {}", e))),
        },
    }
}

async fn run_trigger(client: AgentClient, request: RunRequest, shared: Arc<Shared>) {
    let triggered = tokio::select! {
        _ = shared.cancel.cancelled() => return,
        triggered = client.trigger_stream_run(&request) => triggered,
    };
    let response = match triggered {
        Ok(response) => response,
        Err(e) => {
            shared.fail(into_lgtm(e));
            return;
        }
    };
    tracing::debug!("Stream trigger accepted");
    shared.touch();

    // The trigger's own body is not the event channel; read it to the end so
    // the server does not see a disconnect. Meanwhile the run must keep
    // showing activity.
    let idle = client.stream_idle_timeout();
    let mut body = response.bytes_stream();
    let mut body_done = false;
    loop {
        let deadline = shared.idle_deadline(idle);
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            chunk = body.next(), if !body_done => match chunk {
                Some(Ok(_)) => shared.touch(),
                Some(Err(e)) => {
                    tracing::debug!("Stream trigger body ended early: {}", e);
                    body_done = true;
                }
                None => body_done = true,
            },
            _ = tokio::time::sleep_until(deadline) => {
                if shared.idle_deadline(idle) <= Instant::now() {
                    shared.fail(LgtmError::Stream(format!(
                        "no stream activity for {:?} after the run was triggered",
                        idle
                    )));
                    break;
                }
            }
        }
    }
}
