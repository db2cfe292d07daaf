//! `generate` command: one prompt, one image

use std::sync::Arc;

use colored::Colorize;
use serde::Serialize;

use super::{print_json, print_result};
use crate::api::client::AgentClient;
use crate::api::types::Event;
use crate::config::Config;
use crate::error::Result;
use crate::reducer::{Extraction, RunResult, TextAccumulator};
use crate::session::SessionManager;

#[derive(Serialize)]
struct GenerateOutput<'a> {
    app_name: &'a str,
    user_id: &'a str,
    session_id: &'a str,
    #[serde(flatten)]
    result: &'a RunResult,
    extraction: Extraction,
}

/// Folds streamed payloads and reports when the latest text changes
#[derive(Debug, Default)]
struct StreamEcho {
    text: TextAccumulator,
}

impl StreamEcho {
    /// Returns the new latest text when `payload` changed it
    fn on_payload(&mut self, payload: &str) -> Option<String> {
        let event: Event = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("Ignoring non-JSON stream payload: {}", e);
                return None;
            }
        };
        let before = self.text.text().to_string();
        self.text.feed(&event);
        (self.text.text() != before).then(|| self.text.text().to_string())
    }
}

/// Create a session, submit `prompt`, and print the derived result
///
/// With `stream` the turn runs over the event stream and intermediate
/// model text is echoed as it arrives. Ctrl-C abandons the turn.
pub async fn run_generate(config: &Config, prompt: &str, stream: bool, json: bool) -> Result<()> {
    let client = AgentClient::new(&config.api)?;
    let manager = SessionManager::from_config(Arc::new(client.clone()), config);

    let session_id = manager.ensure_session().await?;
    if !json {
        println!("{} {}", "Session:".bold(), session_id);
    }

    let turn = async {
        if stream {
            let mut echo = StreamEcho::default();
            manager
                .submit_streaming(&client, prompt, move |payload| {
                    if let Some(text) = echo.on_payload(&payload) {
                        if !json {
                            println!("{}", text.dimmed());
                        }
                    }
                })
                .await
        } else {
            manager.submit(prompt).await
        }
    };

    let result = tokio::select! {
        result = turn => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, abandoning turn");
            return Ok(());
        }
    };

    if json {
        return print_json(&GenerateOutput {
            app_name: manager.app_name(),
            user_id: manager.user_id(),
            session_id: &session_id,
            extraction: result.extraction(),
            result: &result,
        });
    }
    println!();
    print_result(&result);
    Ok(())
}
