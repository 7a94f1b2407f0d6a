//! Berth: workspace process supervisor.
//!
//! Spawns one opencode server per workspace folder, discovers the bound
//! port from the server's stdout, tracks workspaces and their chat sessions
//! in an in-memory registry, health-monitors the processes, and tears
//! everything down in bounded time on shutdown.

pub mod config;
pub mod error;
pub mod launcher;
pub mod opencode;
pub mod shutdown;
pub mod workspace;

pub use config::BerthConfig;
pub use error::{WorkspaceError, WorkspaceResult};
pub use shutdown::ShutdownCoordinator;
pub use workspace::supervisor::WorkspaceSupervisor;
