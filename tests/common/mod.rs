use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::MockServer;

use lgtm_client::config::{ApiConfig, Config};

pub const APP: &str = "lgtm-app";
pub const USER: &str = "user-test";

/// Endpoint configuration pointing at `server`
#[allow(dead_code)]
pub fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: format!("{}/v1/agent", server.uri()),
        base_root: server.uri(),
        timeout_seconds: 5,
        ..ApiConfig::default()
    }
}

/// Full configuration pointing at `server`, with a fixed app and user
#[allow(dead_code)]
pub fn config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.api = api_config(server);
    config.session.app_name = APP.to_string();
    config.session.user_id = Some(USER.to_string());
    config
}

/// Path of a session under the agent base
#[allow(dead_code)]
pub fn session_path(session_id: &str) -> String {
    format!("/v1/agent/apps/{}/users/{}/sessions/{}", APP, USER, session_id)
}

/// Session body as the backend returns it
#[allow(dead_code)]
pub fn session_json(session_id: &str, events: Vec<Value>) -> Value {
    json!({
        "id": session_id,
        "appName": APP,
        "userId": USER,
        "state": {},
        "events": events,
        "lastUpdateTime": 1_717_000_000.5
    })
}

#[allow(dead_code)]
pub fn model_event_json(text: &str) -> Value {
    json!({
        "id": "evt-model",
        "author": "gopher_agent",
        "content": {"role": "model", "parts": [{"text": text}]}
    })
}

#[allow(dead_code)]
pub fn user_event_json(text: &str) -> Value {
    json!({
        "id": "evt-user",
        "author": "user",
        "content": {"role": "user", "parts": [{"text": text}]}
    })
}

/// Server-sent event body carrying one `data:` line per payload
#[allow(dead_code)]
pub fn sse_body(payloads: &[Value]) -> Vec<u8> {
    payloads
        .iter()
        .map(|p| format!("data: {}\n\n", p))
        .collect::<String>()
        .into_bytes()
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("lgtm.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
