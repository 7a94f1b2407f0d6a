//! Wire types for the opencode server API.

use serde::{Deserialize, Serialize};

/// Subset of the `GET /app` reply the supervisor cares about.
///
/// Every field is optional: the handshake only requires a well-formed JSON
/// answer, not any particular content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Session record as created by `POST /session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSession {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}
