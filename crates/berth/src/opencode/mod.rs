//! HTTP client for a spawned opencode server.

pub mod client;
pub mod types;

pub use client::{OpencodeClient, OpencodeError, OpencodeResult};
pub use types::{AppInfo, ServerSession};
