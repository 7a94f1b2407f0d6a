//! Launcher process management: spawning, liveness, termination, and
//! ready-signal detection.

pub mod process;
pub mod ready;

pub use process::{
    LauncherCommand, ProcessExit, ProcessHandle, ProcessMetadata, SpawnedProcess,
    TerminationPolicy, probe_version, spawn_server,
};
pub use ready::{ListenLineDetector, ReadySignalDetector, ServerAddr};
