//! Opencode server HTTP client.

use std::time::Duration;

use log::debug;
use reqwest::Client;
use thiserror::Error;

use super::types::{AppInfo, ServerSession};

/// Result type for opencode server calls.
pub type OpencodeResult<T> = Result<T, OpencodeError>;

/// Errors from talking to a workspace's opencode server.
#[derive(Debug, Error)]
pub enum OpencodeError {
    /// HTTP request failed (connect, timeout, decode).
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },
}

/// Client bound to one workspace's server.
#[derive(Debug, Clone)]
pub struct OpencodeClient {
    /// HTTP client.
    client: Client,
    /// Base URL, e.g. "http://127.0.0.1:54321".
    base_url: String,
    /// Port the server announced.
    port: u16,
}

impl OpencodeClient {
    pub fn new(base_url: impl Into<String>, port: u16) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            port,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Post-discovery handshake: the server must answer `GET /app`.
    pub async fn initialize(&self) -> OpencodeResult<AppInfo> {
        let url = format!("{}/app", self.base_url);
        debug!("handshake: GET {url}");
        let response = self.client.get(&url).send().await?;
        Self::handle_response(response).await
    }

    /// Creates a session on the server, returning its server-assigned id.
    pub async fn create_session(&self) -> OpencodeResult<ServerSession> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Parse a JSON reply or surface the error body.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> OpencodeResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(OpencodeError::UnexpectedStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}
