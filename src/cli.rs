//! Command-line interface definition for the LGTM client
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};

/// LGTM client - drive the Gopher LGTM image generator agent
///
/// Creates agent sessions, submits prompts, and extracts the generated
/// image URL from the session event log.
#[derive(Parser, Debug, Clone)]
#[command(name = "lgtm-client")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/lgtm.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the agent base URL from config
    #[arg(long)]
    pub base_url: Option<String>,

    /// Override the agent application name from config
    #[arg(long)]
    pub app: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List the agent applications served by the backend
    Apps {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a session, submit one prompt, and print the generated image
    Generate {
        /// Prompt describing the image
        #[arg(short, long)]
        prompt: String,

        /// Run the turn over the server-push event stream
        #[arg(long)]
        stream: bool,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the derived result of an existing session
    Session {
        /// Session identifier
        #[arg(long)]
        id: String,

        /// User the session belongs to (defaults to the configured user)
        #[arg(long)]
        user: Option<String>,

        /// Also list the raw events in the session log
        #[arg(long)]
        events: bool,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// List previously generated images
    Images {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,

        /// Keep re-listing on the configured refresh interval
        #[arg(long)]
        watch: bool,
    },

    /// Interactive prompt loop against a single session
    Chat,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/lgtm.yaml".to_string()),
            verbose: false,
            base_url: None,
            app: None,
            command: Commands::Apps { json: false },
        }
    }
}
