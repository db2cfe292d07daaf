//! Wire types for the agent backend
//!
//! Messages, run requests, sessions and their event logs, app listings,
//! and image history entries. Session events are backend-defined and kept
//! as raw JSON; typed access goes through [`Event`] accessors that treat
//! any unexpected shape as "nothing here" rather than failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sent by the person driving the client
    User,
    /// Produced by the agent's model
    Model,
}

/// One piece of message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Text of this part; empty for non-text parts
    #[serde(default)]
    pub text: String,
}

/// One turn's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message
    pub role: Role,
    /// Ordered content parts
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Message {
    /// Creates a single-part user message
    ///
    /// # Examples
    ///
    /// ```
    /// use lgtm_client::api::types::{Message, Role};
    ///
    /// let msg = Message::user("a gopher riding a bike");
    /// assert_eq!(msg.role, Role::User);
    /// assert_eq!(msg.parts[0].text, "a gopher riding a bike");
    /// ```
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part { text: text.into() }],
        }
    }

    /// Concatenated text of all parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// One submitted turn, immutable once sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Agent application
    pub app_name: String,
    /// User owning the session
    pub user_id: String,
    /// Target session
    pub session_id: String,
    /// The prompt being submitted
    pub new_message: Message,
}

/// Immediate response of a synchronous `/run` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    /// Session the turn ran against
    pub session_id: String,
    /// The agent's reply
    pub response: Message,
}

/// Coarse classification of a session event, for display only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A prompt sent by the user
    UserMessage,
    /// Model-authored text
    ModelMessage,
    /// The model asked for a tool to run
    FunctionCall,
    /// A tool reported its result
    FunctionResponse,
    /// Any shape we do not recognise
    Unknown,
}

/// One opaque record in a session's event log
///
/// The backend owns the schema. Everything is kept as it arrived so new
/// event kinds round-trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(pub Value);

impl Event {
    /// Wrap a raw JSON value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Raw JSON of the event
    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Backend event id, when present
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Author of the event (`user` or an agent name), when present
    pub fn author(&self) -> Option<&str> {
        self.0.get("author").and_then(Value::as_str)
    }

    fn parts(&self) -> &[Value] {
        self.0
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Non-empty `content.parts[].text` values in order
    ///
    /// # Examples
    ///
    /// ```
    /// use lgtm_client::api::types::Event;
    /// use serde_json::json;
    ///
    /// let ev = Event::new(json!({"content": {"parts": [{"text": "a"}, {"text": ""}, {"text": "b"}]}}));
    /// assert_eq!(ev.text_parts().collect::<Vec<_>>(), vec!["a", "b"]);
    ///
    /// let odd = Event::new(json!({"content": "not an object"}));
    /// assert_eq!(odd.text_parts().count(), 0);
    /// ```
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.parts()
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .filter(|t| !t.is_empty())
    }

    /// Classify the event
    pub fn kind(&self) -> EventKind {
        let parts = self.parts();
        if parts.iter().any(|p| p.get("functionCall").is_some()) {
            return EventKind::FunctionCall;
        }
        if parts.iter().any(|p| p.get("functionResponse").is_some()) {
            return EventKind::FunctionResponse;
        }

        let role = self
            .0
            .get("content")
            .and_then(|c| c.get("role"))
            .and_then(Value::as_str);
        let has_text = self.text_parts().next().is_some();

        match (role, self.author()) {
            (Some("user"), _) | (None, Some("user")) if has_text => EventKind::UserMessage,
            (Some("model"), _) if has_text => EventKind::ModelMessage,
            (None, Some(_)) if has_text => EventKind::ModelMessage,
            _ => EventKind::Unknown,
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Server-held conversation state
///
/// Identity is `(app_name, user_id, id)`. The client only ever replaces a
/// cached snapshot wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier
    #[serde(alias = "sessionId")]
    pub id: String,
    /// Agent application
    pub app_name: String,
    /// Owning user
    pub user_id: String,
    /// Creation timestamp as reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last update timestamp as reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Last update as epoch seconds, the form session creation returns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<f64>,
    /// Append-only event log in arrival order
    #[serde(default, deserialize_with = "null_as_empty")]
    pub events: Vec<Event>,
}

/// An agent application served by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Application name, used in session paths
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Body of `GET /list-apps`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListAppsResponse {
    /// Available applications
    #[serde(default, deserialize_with = "null_as_empty")]
    pub apps: Vec<AppInfo>,
}

/// One previously generated image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageHistoryEntry {
    /// Object key in the image bucket
    pub key: String,
    /// Public URL of the image
    pub url: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// RFC 3339 timestamp, empty when unknown
    #[serde(default)]
    pub last_modified: String,
}

impl ImageHistoryEntry {
    /// Parsed `last_modified`, `None` when empty or malformed
    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_modified)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Body of `GET {root}/v1/images`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListImagesResponse {
    /// Images, newest first is not guaranteed
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<ImageHistoryEntry>,
}
