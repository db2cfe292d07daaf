//! Transport client integration tests
//!
//! Exercises `AgentClient` against a `wiremock` mock server: endpoint paths,
//! request bodies, response decoding, and how failures are classified.

mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lgtm_client::api::types::{Message, RunRequest};
use lgtm_client::api::{AgentApi, AgentClient};
use lgtm_client::config::ApiConfig;
use lgtm_client::error::transport_error;

use common::{api_config, model_event_json, session_json, session_path, APP, USER};

fn client(server: &MockServer) -> AgentClient {
    AgentClient::new(&api_config(server)).expect("client")
}

#[tokio::test]
async fn test_list_apps_parses_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/agent/list-apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apps": [
                {"name": APP, "description": "Draws gophers"},
                {"name": "other"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let apps = client(&server).list_apps().await.expect("list apps");
    assert_eq!(apps.len(), 2);
    assert_eq!(apps[0].name, APP);
    assert_eq!(apps[0].description.as_deref(), Some("Draws gophers"));
    assert!(apps[1].description.is_none());
}

#[tokio::test]
async fn test_create_session_server_assigned_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/agent/apps/{}/users/{}/sessions", APP, USER)))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("srv-1", vec![])))
        .expect(1)
        .mount(&server)
        .await;

    let session = client(&server)
        .create_session(APP, USER, None)
        .await
        .expect("create session");
    assert_eq!(session.id, "srv-1");
    assert!(session.events.is_empty());
    assert_eq!(session.last_update_time, Some(1_717_000_000.5));
}

#[tokio::test]
async fn test_create_session_client_assigned_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(session_path("client-7")))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("client-7", vec![])))
        .expect(1)
        .mount(&server)
        .await;

    let session = client(&server)
        .create_session(APP, USER, Some("client-7"))
        .await
        .expect("create session");
    assert_eq!(session.id, "client-7");
}

#[tokio::test]
async fn test_run_turn_sends_camel_case_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/agent/run"))
        .and(body_partial_json(json!({
            "appName": APP,
            "userId": USER,
            "sessionId": "s-1",
            "newMessage": {"role": "user", "parts": [{"text": "a gopher"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionId": "s-1",
            "response": {"role": "model", "parts": [{"text": "on it"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = RunRequest {
        app_name: APP.to_string(),
        user_id: USER.to_string(),
        session_id: "s-1".to_string(),
        new_message: Message::user("a gopher"),
    };
    let response = client(&server).run_turn(&request).await.expect("run turn");
    assert_eq!(response.session_id, "s-1");
    assert_eq!(response.response.text(), "on it");
}

#[tokio::test]
async fn test_get_session_keeps_events_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(session_path("s-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json(
            "s-1",
            vec![
                model_event_json("first"),
                json!({"author": "gopher_agent", "actions": {"stateDelta": {}}}),
                model_event_json("second"),
            ],
        )))
        .mount(&server)
        .await;

    let session = client(&server)
        .get_session(APP, USER, "s-1")
        .await
        .expect("get session");
    assert_eq!(session.events.len(), 3);
    assert_eq!(session.events[0].text_parts().next(), Some("first"));
    assert_eq!(session.events[2].text_parts().next(), Some("second"));
}

#[tokio::test]
async fn test_get_session_not_found_is_not_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(session_path("gone")))
        .respond_with(ResponseTemplate::new(404).set_body_string("Session not found"))
        .mount(&server)
        .await;

    let err = client(&server)
        .get_session(APP, USER, "gone")
        .await
        .expect_err("missing session");
    let transport = transport_error(&err).expect("transport error");
    assert!(transport.is_not_found());
    assert!(!transport.is_network());
    assert!(err.to_string().contains("Session not found"));
}

#[tokio::test]
async fn test_unreachable_backend_is_network_failure() {
    let config = ApiConfig {
        base_url: "http://127.0.0.1:9/v1/agent".to_string(),
        base_root: "http://127.0.0.1:9".to_string(),
        timeout_seconds: 2,
        connect_timeout_seconds: 1,
        ..ApiConfig::default()
    };
    let err = AgentClient::new(&config)
        .expect("client")
        .list_apps()
        .await
        .expect_err("nothing listens on port 9");
    let transport = transport_error(&err).expect("transport error");
    assert!(transport.is_network());
    assert!(transport.is_retryable());
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/agent/list-apps"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"apps": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = ApiConfig {
        timeout_seconds: 1,
        ..api_config(&server)
    };
    let err = AgentClient::new(&config)
        .expect("client")
        .list_apps()
        .await
        .expect_err("request should time out");
    let transport = transport_error(&err).expect("transport error");
    assert!(matches!(
        transport,
        lgtm_client::TransportError::Timeout(_)
    ));
}

#[tokio::test]
async fn test_malformed_json_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/agent/list-apps"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{not json", "application/json"))
        .mount(&server)
        .await;

    let err = client(&server).list_apps().await.expect_err("bad body");
    let transport = transport_error(&err).expect("transport error");
    assert!(matches!(transport, lgtm_client::TransportError::Decode(_)));
    assert!(!transport.is_retryable());
}

#[tokio::test]
async fn test_list_images_uses_root_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/images"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [{
                "key": "lgtm/abc.png",
                "url": "https://img.example/lgtm/abc.png",
                "size": 20480,
                "lastModified": "2024-05-01T12:00:00Z"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let images = client(&server).list_images().await.expect("list images");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].key, "lgtm/abc.png");
    assert!(images[0].last_modified_at().is_some());
}

#[tokio::test]
async fn test_server_error_is_retryable_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/agent/run"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let request = RunRequest {
        app_name: APP.to_string(),
        user_id: USER.to_string(),
        session_id: "s-1".to_string(),
        new_message: Message::user("a gopher"),
    };
    let err = client(&server)
        .run_turn(&request)
        .await
        .expect_err("server error");
    let transport = transport_error(&err).expect("transport error");
    assert!(matches!(
        transport,
        lgtm_client::TransportError::Status { status: 503, .. }
    ));
    assert!(transport.is_retryable());
}
