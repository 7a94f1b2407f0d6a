//! Workspace and session data model.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::launcher::process::ProcessMetadata;
use crate::opencode::OpencodeClient;

/// Lifecycle state of a workspace.
///
/// `Stopped` and `Error` are terminal; the registry entry is removed on
/// reaching either, so they are only observable on snapshots handed to
/// in-flight callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

impl WorkspaceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for WorkspaceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown workspace status: {}", s)),
        }
    }
}

/// Why a workspace transitioned to `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceFailure {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl WorkspaceFailure {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Inactive,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Parameters for starting a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartWorkspace {
    /// Absolute path of the folder the server runs in.
    pub folder: String,
    /// Model identifier sessions on this workspace default to.
    pub model: String,
}

/// A chat session multiplexed onto a workspace server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Server-assigned session id.
    pub id: String,
    pub workspace_id: String,
    pub model: String,
    /// Port of the owning workspace's server.
    pub port: u16,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
}

/// Externally visible snapshot of a supervised workspace.
///
/// The live process handle never leaves the supervisor; snapshots carry
/// only [`ProcessMetadata`]. The client is attached once `Running` is
/// reached and is skipped during serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub folder: String,
    pub model: String,
    pub port: u16,
    pub status: WorkspaceStatus,
    #[serde(default)]
    pub sessions: HashMap<String, Session>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkspaceFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessMetadata>,
    #[serde(skip)]
    pub client: Option<OpencodeClient>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(folder: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            folder: folder.into(),
            model: model.into(),
            port: 0,
            status: WorkspaceStatus::Starting,
            sessions: HashMap::new(),
            error: None,
            process: None,
            client: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkspaceStatus::Running
    }
}
