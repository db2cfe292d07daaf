//! `session` command: inspect an existing session

use std::sync::Arc;

use colored::Colorize;
use prettytable::{cell, row, Table};
use serde::Serialize;

use super::{preview, print_json, print_result};
use crate::api::client::AgentClient;
use crate::api::types::{Event, Session};
use crate::cache::{SessionCache, SessionKey};
use crate::config::Config;
use crate::error::{unshare, LgtmError, Result};
use crate::reducer::{Extraction, RunResult};

#[derive(Serialize)]
struct SessionOutput<'a> {
    session_id: &'a str,
    app_name: &'a str,
    user_id: &'a str,
    event_count: usize,
    #[serde(flatten)]
    result: &'a RunResult,
    extraction: Extraction,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<&'a [Event]>,
}

/// Fetch a session and print its derived result
///
/// # Errors
///
/// Returns `Config` when no user id is given and none is configured, or
/// the fetch failure
pub async fn show_session(
    config: &Config,
    session_id: &str,
    user: Option<&str>,
    events: bool,
    json: bool,
) -> Result<()> {
    let user_id = user
        .or(config.session.user_id.as_deref())
        .ok_or_else(|| LgtmError::Config("no user id: pass --user or set session.user_id".into()))?;

    let client = AgentClient::new(&config.api)?;
    let cache = SessionCache::new(Arc::new(client), config.cache.session_stale_after());
    let key = SessionKey::new(&config.session.app_name, user_id, session_id);
    let session = cache.get(&key).await.map_err(unshare)?;
    let result = RunResult::from_session(&session);

    if json {
        return print_json(&SessionOutput {
            session_id: &session.id,
            app_name: &session.app_name,
            user_id: &session.user_id,
            event_count: session.events.len(),
            extraction: result.extraction(),
            result: &result,
            events: events.then_some(session.events.as_slice()),
        });
    }

    println!(
        "{} {} ({} events)",
        "Session:".bold(),
        session.id,
        session.events.len()
    );
    if events {
        println!();
        events_table(&session).printstd();
    }
    println!();
    print_result(&result);
    Ok(())
}

fn events_table(session: &Session) -> Table {
    let mut table = Table::new();
    table.add_row(row!["#", "Author", "Kind", "Text"]);
    for (i, event) in session.events.iter().enumerate() {
        let text = event.text_parts().last().map(|t| preview(t, 60)).unwrap_or_default();
        table.add_row(row![
            i + 1,
            event.author().unwrap_or("-"),
            format!("{:?}", event.kind()),
            text
        ]);
    }
    table
}
