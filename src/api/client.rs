//! HTTP transport client for the agent backend
//!
//! [`AgentClient`] issues the request/response calls (apps, sessions, turns,
//! images) and exposes the two halves of a streamed run (the event channel
//! and its trigger) to [`crate::stream`]. It performs no retries; every
//! failure surfaces as an [`LgtmError::Transport`].
//!
//! Request/response calls are bounded by the configured timeout. The event
//! channel only has its response headers bounded by it: the body uses a
//! second `reqwest` client with just a connect timeout, so a long generation
//! is not cut off mid-stream. Silence on an open stream is bounded by the
//! stream idle timeout in [`crate::stream`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use crate::api::types::{
    AppInfo, ImageHistoryEntry, ListAppsResponse, ListImagesResponse, RunRequest, RunResponse,
    Session,
};
use crate::config::ApiConfig;
use crate::error::{LgtmError, Result, TransportError};

/// Request/response surface of the agent backend
///
/// The lifecycle manager and caches depend on this trait rather than on
/// [`AgentClient`] so tests can supply a scripted backend.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// `GET /list-apps`
    async fn list_apps(&self) -> Result<Vec<AppInfo>>;

    /// `POST /apps/{app}/users/{user}/sessions[/{id}]`
    ///
    /// With `session_id` the backend must adopt that id; without it the
    /// backend assigns one.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session>;

    /// `POST /run`; does not touch any cached session
    async fn run_turn(&self, request: &RunRequest) -> Result<RunResponse>;

    /// `GET /apps/{app}/users/{user}/sessions/{id}`
    async fn get_session(&self, app_name: &str, user_id: &str, session_id: &str)
        -> Result<Session>;

    /// `GET {root}/v1/images`
    async fn list_images(&self) -> Result<Vec<ImageHistoryEntry>>;
}

#[async_trait]
impl<T: AgentApi + ?Sized> AgentApi for Arc<T> {
    async fn list_apps(&self) -> Result<Vec<AppInfo>> {
        (**self).list_apps().await
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session> {
        (**self).create_session(app_name, user_id, session_id).await
    }

    async fn run_turn(&self, request: &RunRequest) -> Result<RunResponse> {
        (**self).run_turn(request).await
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Session> {
        (**self).get_session(app_name, user_id, session_id).await
    }

    async fn list_images(&self) -> Result<Vec<ImageHistoryEntry>> {
        (**self).list_images().await
    }
}

/// `reqwest`-backed agent client
///
/// # Examples
///
/// ```
/// use lgtm_client::api::client::AgentClient;
/// use lgtm_client::config::ApiConfig;
///
/// let client = AgentClient::new(&ApiConfig::default()).unwrap();
/// assert_eq!(
///     client.run_sse_url().unwrap().as_str(),
///     "http://localhost:8080/v1/agent/run_sse"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: Client,
    stream_http: Client,
    base_url: Url,
    base_root: Url,
    timeout: Duration,
    stream_idle: Duration,
}

impl AgentClient {
    /// Build a client from endpoint configuration
    ///
    /// # Errors
    ///
    /// Returns error if a base URL does not parse or the HTTP client cannot
    /// be initialised
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let base_root = Url::parse(&config.base_root)?;
        if base_url.cannot_be_a_base() || base_root.cannot_be_a_base() {
            return Err(LgtmError::Config("base URLs must be hierarchical http(s) URLs".into()).into());
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .default_headers(headers.clone())
            .user_agent(concat!("lgtm-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LgtmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let stream_http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .default_headers(headers)
            .user_agent(concat!("lgtm-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LgtmError::Config(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!(
            base_url = %base_url,
            base_root = %base_root,
            timeout_secs = config.timeout_seconds,
            "Initialized agent client"
        );

        Ok(Self {
            http,
            stream_http,
            base_url,
            base_root,
            timeout: config.timeout(),
            stream_idle: config.stream_idle_timeout(),
        })
    }

    /// Request timeout applied to request/response calls
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Longest silence tolerated on a streamed run after its trigger
    pub fn stream_idle_timeout(&self) -> Duration {
        self.stream_idle
    }

    fn join(base: &Url, segments: &[&str]) -> Result<Url> {
        let mut url = base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| LgtmError::Config(format!("cannot extend base URL {}", base)))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// URL of an endpoint under the agent base path
    pub fn agent_url(&self, segments: &[&str]) -> Result<Url> {
        Self::join(&self.base_url, segments)
    }

    /// URL of the image history listing
    pub fn images_url(&self) -> Result<Url> {
        Self::join(&self.base_root, &["v1", "images"])
    }

    /// URL shared by the event channel and its trigger
    pub fn run_sse_url(&self) -> Result<Url> {
        self.agent_url(&["run_sse"])
    }

    fn transport_error(&self, err: &reqwest::Error) -> LgtmError {
        LgtmError::Transport(TransportError::from_reqwest(err, self.timeout))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!("{} request failed: {}", what, e);
            self.transport_error(&e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("{} returned {}: {}", what, status, body);
            return Err(LgtmError::Transport(TransportError::Status {
                status: status.as_u16(),
                body,
            })
            .into());
        }

        let body = response.text().await.map_err(|e| self.transport_error(&e))?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("{} returned malformed JSON: {}", what, e);
            LgtmError::Transport(TransportError::Decode(e.to_string())).into()
        })
    }

    /// Open the server-push channel for a streamed run
    ///
    /// Resolves once response headers arrive, waiting at most the request
    /// timeout for them. The body is the raw event stream; it has no total
    /// timeout.
    pub async fn open_event_channel(&self) -> Result<reqwest::Response> {
        let url = self.run_sse_url()?;
        tracing::debug!(url = %url, "Opening event channel");

        let send = self
            .stream_http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| {
                LgtmError::Stream(format!(
                    "event channel did not answer within {:?}",
                    self.timeout
                ))
            })?
            .map_err(|e| LgtmError::Stream(format!("event channel request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LgtmError::Stream(format!("event channel returned HTTP {}", status)).into());
        }
        Ok(response)
    }

    /// Send the payload that starts a streamed run
    ///
    /// Waits at most the request timeout for response headers. The returned
    /// response body is left for the caller to drain or drop.
    pub async fn trigger_stream_run(&self, request: &RunRequest) -> Result<reqwest::Response> {
        let url = self.run_sse_url()?;
        tracing::debug!(url = %url, session_id = %request.session_id, "Sending stream trigger");

        let send = self
            .stream_http
            .post(url)
            .header(ACCEPT, "text/event-stream, application/json")
            .json(request)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| LgtmError::Transport(TransportError::Timeout(self.timeout)))?
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LgtmError::Transport(TransportError::Status {
                status: status.as_u16(),
                body,
            })
            .into());
        }
        Ok(response)
    }
}

#[async_trait]
impl AgentApi for AgentClient {
    async fn list_apps(&self) -> Result<Vec<AppInfo>> {
        let url = self.agent_url(&["list-apps"])?;
        let body: ListAppsResponse = self.send_json(self.http.get(url), "list-apps").await?;
        tracing::debug!("Fetched {} apps", body.apps.len());
        Ok(body.apps)
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
    ) -> Result<Session> {
        let url = match session_id {
            Some(id) => self.agent_url(&["apps", app_name, "users", user_id, "sessions", id])?,
            None => self.agent_url(&["apps", app_name, "users", user_id, "sessions"])?,
        };
        let session: Session = self.send_json(self.http.post(url), "create session").await?;
        tracing::info!(
            app = app_name,
            user = user_id,
            session_id = %session.id,
            "Created session"
        );
        Ok(session)
    }

    async fn run_turn(&self, request: &RunRequest) -> Result<RunResponse> {
        let url = self.agent_url(&["run"])?;
        tracing::debug!(session_id = %request.session_id, "Running agent turn");
        self.send_json(self.http.post(url).json(request), "run").await
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Session> {
        let url = self.agent_url(&["apps", app_name, "users", user_id, "sessions", session_id])?;
        let session: Session = self.send_json(self.http.get(url), "get session").await?;
        tracing::debug!(session_id, events = session.events.len(), "Fetched session");
        Ok(session)
    }

    async fn list_images(&self) -> Result<Vec<ImageHistoryEntry>> {
        let url = self.images_url()?;
        let body: ListImagesResponse = self.send_json(self.http.get(url), "list images").await?;
        tracing::debug!("Fetched {} images", body.images.len());
        Ok(body.images)
    }
}
