//! LGTM client - drive a remote image-generation agent
//!
//! This library talks to an agent backend that turns a text prompt into a
//! generated image. It creates sessions, submits turns (request/response or
//! over a server-push event stream), refetches the session's event log, and
//! derives the latest model text and the image URL inside it.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `api`: wire types, the HTTP transport client, and SSE framing
//! - `stream`: event stream controller for streamed turns
//! - `cache`: keyed query cache with staleness and request coalescing
//! - `reducer`: derives the latest model text and image URL from events
//! - `session`: session lifecycle manager
//! - `identity`: injectable identifier providers
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lgtm_client::{AgentClient, Config, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/lgtm.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let client = AgentClient::new(&config.api)?;
//!     let manager = SessionManager::from_config(Arc::new(client), &config);
//!     manager.ensure_session().await?;
//!     let result = manager.submit("a gopher giving a thumbs up").await?;
//!     println!("{:?}", result.extracted_image_url);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod reducer;
pub mod session;
pub mod stream;

// Re-export commonly used types
pub use api::{AgentApi, AgentClient};
pub use config::Config;
pub use error::{LgtmError, Result, TransportError};
pub use reducer::{reduce, RunResult};
pub use session::{LifecycleState, SessionManager};
pub use stream::{StreamHandle, StreamState};

#[cfg(test)]
pub mod test_utils;
