//! Command handlers for the CLI
//!
//! Each handler builds the library components it needs from [`Config`],
//! runs one operation, and prints the outcome. Human-readable output goes
//! to stdout; with `--json` stdout carries only the JSON document.
//!
//! [`Config`]: crate::config::Config

use colored::Colorize;
use serde::Serialize;

use crate::error::{LgtmError, Result};
use crate::reducer::{linkify_segments, Extraction, RunResult, Segment};

pub mod apps;
pub mod chat;
pub mod generate;
pub mod images;
pub mod session;

/// Print `value` as pretty JSON
fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(LgtmError::Serialization)?;
    println!("{}", json);
    Ok(())
}

/// Render text with its URLs highlighted
fn linkify(text: &str) -> String {
    linkify_segments(text)
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(t) => t.to_string(),
            Segment::Url(u) => u.blue().underline().to_string(),
        })
        .collect()
}

/// Print a derived result, telling "no text yet" apart from "no URL"
fn print_result(result: &RunResult) {
    match result.extraction() {
        Extraction::NoText => println!("{}", "No model output yet".yellow()),
        Extraction::TextWithoutUrl { text } => {
            println!("{}", linkify(&text));
            println!("{}", "No image URL found in the reply".yellow());
        }
        Extraction::Found { text, url } => {
            println!("{}", linkify(&text));
            println!();
            println!("{} {}", "Image:".green().bold(), url.blue().underline());
        }
    }
}

/// Shorten `text` to at most `max` characters for table cells
fn preview(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max {
        return single_line;
    }
    let mut cut: String = single_line.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
