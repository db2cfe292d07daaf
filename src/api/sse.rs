//! Server-sent event framing
//!
//! [`SseDecoder`] turns raw body chunks into complete events. Events are
//! separated by a blank line (`\n\n` or `\r\n\r\n`); chunk boundaries may
//! fall anywhere, including inside a multi-byte UTF-8 sequence.
//!
//! Field processing:
//!
//! - `data:` -- appended to the event payload; multiple lines are joined
//!   with `\n`.
//! - `event:` -- recorded as the event type.
//! - Events without data are dropped. Every other payload is delivered.
//! - `id:`, `retry:` and `:` comment lines are ignored.

use bytes::Bytes;
use futures::{Stream, StreamExt};

/// A complete server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Payload, passed through untouched
    pub data: String,
    /// `event:` field, when present
    pub event: Option<String>,
}

/// Incremental SSE parser
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk and return every event it completed
    ///
    /// # Examples
    ///
    /// ```
    /// use lgtm_client::api::sse::SseDecoder;
    ///
    /// let mut decoder = SseDecoder::new();
    /// assert!(decoder.push(b"data: hel").is_empty());
    /// let events = decoder.push(b"lo\n\n");
    /// assert_eq!(events[0].data, "hello");
    /// ```
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, next)) = find_boundary(&self.pending) {
            let block: Vec<u8> = self.pending.drain(..next).take(end).collect();
            if let Some(event) = self.process_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let block = std::mem::take(&mut self.pending);
        self.process_block(&String::from_utf8_lossy(&block))
    }

    fn process_block(&self, block: &str) -> Option<SseEvent> {
        let mut data_lines: Vec<&str> = Vec::new();
        let mut event_type: Option<&str> = None;

        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
            } else if let Some(value) = line.strip_prefix("event:") {
                event_type = Some(value.trim());
            }
            // `id:`, `retry:` and `:` comments carry nothing we act on.
        }

        let data = data_lines.join("\n");
        if data.is_empty() {
            return None;
        }

        Some(SseEvent {
            data,
            event: event_type.map(str::to_string),
        })
    }
}

/// Locate the first blank line: `(end of block, start of the remainder)`
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    for i in 0..buf.len() {
        if buf[i] != b'\n' {
            continue;
        }
        match buf.get(i + 1) {
            Some(b'\n') => return Some((i, i + 2)),
            Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((i, i + 3)),
            _ => {}
        }
    }
    None
}

/// Drive a body stream through an [`SseDecoder`], handing each event to
/// `on_event`
///
/// Returns when the stream ends, or with the first chunk error.
pub async fn pump_sse_stream<S, E, F>(byte_stream: S, mut on_event: F) -> std::result::Result<(), E>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    F: FnMut(SseEvent),
{
    let mut decoder = SseDecoder::new();
    tokio::pin!(byte_stream);

    while let Some(chunk) = byte_stream.next().await {
        for event in decoder.push(&chunk?) {
            on_event(event);
        }
    }

    if let Some(event) = decoder.finish() {
        on_event(event);
    }
    Ok(())
}
