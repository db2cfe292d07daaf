//! Test utilities for the LGTM client
//!
//! [`FakeAgentApi`] is an in-memory agent backend. It records how often each
//! call was made, can be told to fail individual calls, and can hold calls
//! at a gate so tests can observe intermediate states.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::api::client::AgentApi;
use crate::api::types::{
    AppInfo, Event, ImageHistoryEntry, Message, Part, Role, RunRequest, RunResponse, Session,
};
use crate::error::{LgtmError, Result, TransportError};

/// Reply text used when a test does not script one
pub const DEFAULT_REPLY: &str = "Here is your gopher: https://img.example/gopher.png";

/// Per-call counters
#[derive(Debug, Default)]
pub struct CallCounts {
    pub list_apps: AtomicUsize,
    pub create_session: AtomicUsize,
    pub run_turn: AtomicUsize,
    pub get_session: AtomicUsize,
    pub list_images: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Scriptable in-memory backend
#[derive(Debug)]
pub struct FakeAgentApi {
    pub calls: CallCounts,
    sessions: Mutex<HashMap<String, Session>>,
    next_session: AtomicUsize,
    reply: Mutex<String>,
    apps: Mutex<Vec<AppInfo>>,
    images: Mutex<Vec<ImageHistoryEntry>>,
    fail_create: AtomicBool,
    fail_run: AtomicBool,
    fail_get: AtomicBool,
    create_gate: Mutex<Option<Arc<Semaphore>>>,
    run_gate: Mutex<Option<Arc<Semaphore>>>,
    get_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl Default for FakeAgentApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAgentApi {
    pub fn new() -> Self {
        Self {
            calls: CallCounts::default(),
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicUsize::new(0),
            reply: Mutex::new(DEFAULT_REPLY.to_string()),
            apps: Mutex::new(vec![AppInfo {
                name: "gopher-lgtm-image-generator-agent".to_string(),
                description: Some("Generates LGTM gophers".to_string()),
            }]),
            images: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            fail_run: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            create_gate: Mutex::new(None),
            run_gate: Mutex::new(None),
            get_gate: Mutex::new(None),
        }
    }

    pub fn set_reply(&self, text: &str) {
        *self.reply.lock().unwrap() = text.to_string();
    }

    pub fn set_images(&self, images: Vec<ImageHistoryEntry>) {
        *self.images.lock().unwrap() = images;
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_run(&self, fail: bool) {
        self.fail_run.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    /// Hold every `create_session` until the returned semaphore gets a permit
    pub fn gate_create(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.create_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Hold every `run_turn` until the returned semaphore gets a permit
    pub fn gate_run(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.run_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Hold every `get_session` until the returned semaphore gets a permit
    pub fn gate_get(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.get_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn pass_gate(gate: &Mutex<Option<Arc<Semaphore>>>) {
        let gate = gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }
    }

    fn not_found() -> anyhow::Error {
        LgtmError::Transport(TransportError::Status {
            status: 404,
            body: "session not found".to_string(),
        })
        .into()
    }
}

/// A model-authored text event
pub fn model_event(text: &str) -> Event {
    Event::new(json!({
        "author": "gopher_agent",
        "content": {"role": "model", "parts": [{"text": text}]}
    }))
}

/// A user prompt event
pub fn user_event(text: &str) -> Event {
    Event::new(json!({
        "author": "user",
        "content": {"role": "user", "parts": [{"text": text}]}
    }))
}

/// A tool call event without text
pub fn tool_call_event() -> Event {
    Event::new(json!({
        "author": "gopher_agent",
        "content": {"role": "model", "parts": [{"functionCall": {"name": "generate_image", "args": {}}}]}
    }))
}

#[async_trait]
impl AgentApi for FakeAgentApi {
    async fn list_apps(&self) -> Result<Vec<AppInfo>> {
        bump(&self.calls.list_apps);
        Ok(self.apps.lock().unwrap().clone())
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session> {
        bump(&self.calls.create_session);
        Self::pass_gate(&self.create_gate).await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(LgtmError::Transport(TransportError::Network(
                "connection refused".to_string(),
            ))
            .into());
        }
        let id = match session_id {
            Some(id) => id.to_string(),
            None => format!(
                "session-{}",
                self.next_session.fetch_add(1, Ordering::SeqCst) + 1
            ),
        };
        let session = Session {
            id: id.clone(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            created_at: None,
            updated_at: None,
            last_update_time: Some(1_700_000_000.0),
            events: Vec::new(),
        };
        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(session)
    }

    async fn run_turn(&self, request: &RunRequest) -> Result<RunResponse> {
        bump(&self.calls.run_turn);
        Self::pass_gate(&self.run_gate).await;
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(LgtmError::Transport(TransportError::Status {
                status: 500,
                body: "agent crashed".to_string(),
            })
            .into());
        }

        let reply = self.reply.lock().unwrap().clone();
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&request.session_id)
            .ok_or_else(Self::not_found)?;
        session.events.push(user_event(&request.new_message.text()));
        session.events.push(tool_call_event());
        session.events.push(model_event(&reply));

        Ok(RunResponse {
            session_id: request.session_id.clone(),
            response: Message {
                role: Role::Model,
                parts: vec![Part { text: reply }],
            },
        })
    }

    async fn get_session(
        &self,
        _app_name: &str,
        _user_id: &str,
        session_id: &str,
    ) -> Result<Session> {
        bump(&self.calls.get_session);
        Self::pass_gate(&self.get_gate).await;
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Self::not_found());
        }
        self.session(session_id).ok_or_else(Self::not_found)
    }

    async fn list_images(&self) -> Result<Vec<ImageHistoryEntry>> {
        bump(&self.calls.list_images);
        Ok(self.images.lock().unwrap().clone())
    }
}
