//! LGTM client - drive the Gopher LGTM image generator agent
//!
#![doc = "LGTM client"]
#![doc = "Main entry point for the lgtm-client command-line tool."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lgtm_client::cli::{Cli, Commands};
use lgtm_client::commands;
use lgtm_client::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/lgtm.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Apps { json } => {
            tracing::info!("Listing agent apps");
            commands::apps::list_apps(&config, json).await?;
            Ok(())
        }
        Commands::Generate {
            prompt,
            stream,
            json,
        } => {
            tracing::info!("Generating image");
            if stream {
                tracing::debug!("Using the event stream");
            }
            commands::generate::run_generate(&config, &prompt, stream, json).await?;
            Ok(())
        }
        Commands::Session {
            id,
            user,
            events,
            json,
        } => {
            tracing::info!("Showing session {}", id);
            commands::session::show_session(&config, &id, user.as_deref(), events, json).await?;
            Ok(())
        }
        Commands::Images { json, watch } => {
            tracing::info!("Listing image history");
            commands::images::list_images(&config, json, watch).await?;
            Ok(())
        }
        Commands::Chat => {
            tracing::info!("Starting interactive chat");
            commands::chat::run_chat(&config).await?;
            Ok(())
        }
    }
}

/// Install the tracing subscriber
///
/// Logs go to stderr so `--json` output on stdout stays parseable.
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "lgtm_client=debug"
    } else {
        "lgtm_client=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
