//! Agent backend API
//!
//! - [`types`]: wire data model
//! - [`client`]: request/response transport and the [`client::AgentApi`] seam
//! - [`sse`]: server-sent event framing for the stream controller

pub mod client;
pub mod sse;
pub mod types;

pub use client::{AgentApi, AgentClient};
