//! Event reducer: derive the current answer from a session's event log
//!
//! The reducer is a pure fold over events in arrival order. Every
//! non-empty `content.parts[].text` overwrites the accumulator, so the
//! result is the last text-bearing part of the last text-bearing event.
//! Events and parts without text are inert.
//!
//! Because the fold is "last write wins", reducing a prefix and then
//! feeding the remaining suffix to the same [`TextAccumulator`] gives the
//! same result as reducing the whole sequence at once.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::api::types::{Event, Session};

/// Output of [`reduce`]
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction<'a> {
    /// The events that were reduced
    pub events: &'a [Event],
    /// Most recent model text, empty when no event carried text
    pub text_from_model: String,
}

/// Fold events one at a time
///
/// # Examples
///
/// ```
/// use lgtm_client::api::types::Event;
/// use lgtm_client::reducer::TextAccumulator;
/// use serde_json::json;
///
/// let mut acc = TextAccumulator::new();
/// acc.feed(&Event::new(json!({"content": {"parts": [{"text": "first"}]}})));
/// acc.feed(&Event::new(json!({"content": {"parts": [{"functionCall": {}}]}})));
/// assert_eq!(acc.text(), "first");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextAccumulator {
    text: String,
}

impl TextAccumulator {
    /// Start with no text
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event
    pub fn feed(&mut self, event: &Event) {
        if let Some(last) = event.text_parts().last() {
            self.text.clear();
            self.text.push_str(last);
        }
    }

    /// Apply a sequence of events in order
    pub fn feed_all<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) {
        for event in events {
            self.feed(event);
        }
    }

    /// Current text, empty when nothing has contributed yet
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the accumulator
    pub fn into_text(self) -> String {
        self.text
    }
}

/// Reduce an ordered event log to its most recent model text
pub fn reduce(events: &[Event]) -> Reduction<'_> {
    let mut acc = TextAccumulator::new();
    acc.feed_all(events);
    Reduction {
        events,
        text_from_model: acc.into_text(),
    }
}

// Constant pattern, compiled on first use; `test_url_pattern_compiles`
// forces it.
static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s`'"]+"#).expect("valid URL pattern"));

/// First `http(s)://` URL in `text`, stopping at whitespace, quotes, or
/// backticks
///
/// # Examples
///
/// ```
/// use lgtm_client::reducer::extract_url;
///
/// assert_eq!(
///     extract_url("Here: https://img.example/a.png done"),
///     Some("https://img.example/a.png")
/// );
/// assert_eq!(extract_url("`https://img.example/a.png`"), Some("https://img.example/a.png"));
/// assert_eq!(extract_url("no link here"), None);
/// ```
pub fn extract_url(text: &str) -> Option<&str> {
    URL_PATTERN.find(text).map(|m| m.as_str())
}

/// What the reducer could derive from a session, distinguishing "nothing
/// yet" from "text without an image"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Extraction {
    /// No event has contributed text yet
    NoText,
    /// Model text is present but contains no URL
    TextWithoutUrl {
        /// Latest model text
        text: String,
    },
    /// Model text with an embedded image URL
    Found {
        /// Latest model text
        text: String,
        /// First URL found in the text
        url: String,
    },
}

/// Derived view of a session: latest model text plus extracted image URL
///
/// Recomputed from the session every time; never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Latest model-authored text, `None` when there is none yet
    pub latest_model_text: Option<String>,
    /// First URL inside that text, `None` when absent
    pub extracted_image_url: Option<String>,
}

impl RunResult {
    /// Derive the result from accumulated text
    pub fn from_text(text: &str) -> Self {
        if text.is_empty() {
            return Self::empty();
        }
        let url = extract_url(text).map(str::to_string);
        if url.is_none() {
            tracing::warn!("No URL found in model text");
        }
        Self {
            latest_model_text: Some(text.to_string()),
            extracted_image_url: url,
        }
    }

    /// Derive the result from an event log
    pub fn from_events(events: &[Event]) -> Self {
        Self::from_text(&reduce(events).text_from_model)
    }

    /// Derive the result from a session snapshot
    pub fn from_session(session: &Session) -> Self {
        Self::from_events(&session.events)
    }

    /// Result with no text and no URL
    pub fn empty() -> Self {
        Self {
            latest_model_text: None,
            extracted_image_url: None,
        }
    }

    /// Classify the result
    pub fn extraction(&self) -> Extraction {
        match (&self.latest_model_text, &self.extracted_image_url) {
            (None, _) => Extraction::NoText,
            (Some(text), None) => Extraction::TextWithoutUrl { text: text.clone() },
            (Some(text), Some(url)) => Extraction::Found {
                text: text.clone(),
                url: url.clone(),
            },
        }
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// Piece of text for display: plain text or a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Plain text
    Text(&'a str),
    /// A URL
    Url(&'a str),
}

/// Split text into plain and URL segments, preserving every character
pub fn linkify_segments(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for m in URL_PATTERN.find_iter(text) {
        if m.start() > cursor {
            segments.push(Segment::Text(&text[cursor..m.start()]));
        }
        segments.push(Segment::Url(m.as_str()));
        cursor = m.end();
    }
    if cursor < text.len() {
        segments.push(Segment::Text(&text[cursor..]));
    }
    segments
}
