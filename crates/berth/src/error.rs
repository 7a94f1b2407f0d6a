//! Workspace supervisor error types.

use thiserror::Error;

/// Result type for supervisor operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Errors surfaced by workspace lifecycle and session operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The launcher binary is missing or unusable.
    #[error("launcher command `{command}` not found")]
    CommandNotFound { command: String },

    /// The launcher process could not be spawned.
    #[error("failed to spawn workspace process: {message}")]
    SpawnFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The workspace never announced a bound port in time.
    #[error("workspace did not become ready within {timeout_secs}s")]
    StartupTimeout { timeout_secs: u64 },

    /// The server announced a port but the initialize handshake failed.
    #[error("handshake with workspace server at {base_url} failed: {message}")]
    HandshakeFailed { base_url: String, message: String },

    /// The workspace process exited before becoming ready.
    #[error("workspace process crashed: {message}")]
    ProcessCrashed { code: Option<i32>, message: String },

    /// No workspace registered under the given id.
    #[error("workspace `{id}` not found")]
    WorkspaceNotFound { id: String },

    /// A session operation failed locally or against the remote server.
    #[error("session operation failed: {message}")]
    SessionOperationFailed { message: String },

    /// New workspaces cannot be created while shutdown is in progress.
    #[error("cannot create workspace: shutdown in progress")]
    ShutdownInProgress,
}

impl WorkspaceError {
    pub fn command_not_found(command: impl Into<String>) -> Self {
        Self::CommandNotFound {
            command: command.into(),
        }
    }

    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn spawn_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn handshake_failed(base_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            base_url: base_url.into(),
            message: message.into(),
        }
    }

    pub fn crashed(code: Option<i32>, message: impl Into<String>) -> Self {
        Self::ProcessCrashed {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::WorkspaceNotFound { id: id.into() }
    }

    pub fn session_failed(message: impl Into<String>) -> Self {
        Self::SessionOperationFailed {
            message: message.into(),
        }
    }

    /// Operator guidance for errors that have an actionable fix.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::CommandNotFound { .. } => Some(
                "Install the opencode CLI and ensure it is on PATH, \
                 or point `launcher.binary` at its full path",
            ),
            Self::SpawnFailed { .. } => {
                Some("Check that the workspace folder exists and the launcher binary is executable")
            }
            Self::StartupTimeout { .. } => Some(
                "Check the launcher's output for startup errors, or raise `startup.timeout_secs`",
            ),
            Self::HandshakeFailed { .. } => {
                Some("The server announced a port but did not answer; check its logs")
            }
            Self::ProcessCrashed { .. } => {
                Some("Inspect the workspace server logs for the crash cause")
            }
            Self::SessionOperationFailed { .. } => {
                Some("Ensure the opencode server is running and accessible")
            }
            Self::WorkspaceNotFound { .. } | Self::ShutdownInProgress => None,
        }
    }
}
