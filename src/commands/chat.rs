//! `chat` command: interactive prompt loop
//!
//! Every line is submitted as a turn against the current session. A session
//! is (re)created whenever none is held, so a failed creation or a
//! discarded session is retried on the next prompt.

use std::sync::Arc;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use super::print_result;
use crate::api::client::AgentClient;
use crate::config::Config;
use crate::error::Result;
use crate::session::SessionManager;

#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Prompt(&'a str),
    NewSession,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> ChatInput<'_> {
    match line {
        "/quit" | "/exit" => ChatInput::Quit,
        "/new" | "/reset" => ChatInput::NewSession,
        "/help" | "/?" => ChatInput::Help,
        other if other.starts_with('/') => ChatInput::Unknown(other),
        prompt => ChatInput::Prompt(prompt),
    }
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  /new    start a new session");
    println!("  /help   show this help");
    println!("  /quit   leave chat");
    println!("Anything else is sent to the agent as a prompt.");
}

/// Run the interactive loop until `/quit`, Ctrl-C, or end of input
pub async fn run_chat(config: &Config) -> Result<()> {
    let client = AgentClient::new(&config.api)?;
    let manager = SessionManager::from_config(Arc::new(client), config);
    let mut rl = DefaultEditor::new()?;

    println!(
        "{} {} as {}",
        "Chatting with".bold(),
        manager.app_name().cyan(),
        manager.user_id()
    );
    println!("Type /help for commands.\n");

    loop {
        if manager.session_id().is_none() {
            match manager.ensure_session().await {
                Ok(id) => println!("{} {}", "Session:".bold(), id),
                Err(e) => eprintln!("{}", format!("Error: {}", e).red()),
            }
        }

        let line = match rl.readline("lgtm> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        match parse_input(input) {
            ChatInput::Quit => break,
            ChatInput::Help => print_help(),
            ChatInput::NewSession => {
                manager.reset();
                println!("{}", "Started a new session".green());
            }
            ChatInput::Unknown(cmd) => {
                eprintln!("{}", format!("Unknown command: {}", cmd).yellow());
            }
            ChatInput::Prompt(prompt) => {
                println!("{}", "Generating...".dimmed());
                match manager.submit(prompt).await {
                    Ok(result) => print_result(&result),
                    Err(e) => eprintln!("{}", format!("Error: {}", e).red()),
                }
                println!();
            }
        }
    }

    println!("Goodbye!");
    Ok(())
}
