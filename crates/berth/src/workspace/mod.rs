//! Workspace registry, supervisor, and health monitoring.

pub mod models;
pub mod monitor;
pub mod supervisor;

pub use models::{
    Session, SessionStatus, StartWorkspace, Workspace, WorkspaceFailure, WorkspaceStatus,
};
pub use supervisor::{ListenerId, StopOptions, WorkspaceSupervisor};
