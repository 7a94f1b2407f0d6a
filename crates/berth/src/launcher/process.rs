//! Process handles for spawned workspace servers.
//!
//! The spawned `Child` is owned by a background waiter task that reaps it
//! and publishes its exit exactly once; everything else (liveness probes,
//! escalating termination, startup observers) works against the
//! [`ProcessHandle`] and the exit watch channel.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;

use crate::error::{WorkspaceError, WorkspaceResult};

/// Everything needed to launch one workspace server.
#[derive(Debug, Clone)]
pub struct LauncherCommand {
    pub binary: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: String,
}

impl LauncherCommand {
    fn render(&self) -> String {
        std::iter::once(self.binary.clone())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Terminal state of a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// When the exit was observed.
    pub at: DateTime<Utc>,
}

impl ProcessExit {
    pub fn clean(&self) -> bool {
        self.code == Some(0)
    }

    fn from_status(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;
        Self {
            code: status.code(),
            signal: status.signal(),
            at: Utc::now(),
        }
    }

    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
            at: Utc::now(),
        }
    }
}

/// Descriptive snapshot of a spawned process, carried on the workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetadata {
    pub pid: u32,
    pub command: String,
    pub working_dir: String,
    pub started_at: DateTime<Utc>,
}

/// Escalation policy for stopping a process.
///
/// Early attempts deliver SIGTERM; the final attempt (or every attempt when
/// `force` is set) delivers SIGKILL. Between failed attempts the wait backs
/// off linearly (`backoff * attempt`).
#[derive(Debug, Clone, Copy)]
pub struct TerminationPolicy {
    pub attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff: Duration,
    pub force: bool,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            backoff: Duration::from_millis(500),
            force: false,
        }
    }
}

/// Handle to a supervised child process.
///
/// Cloneable; the underlying `Child` lives in the waiter task.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    metadata: ProcessMetadata,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

/// A freshly spawned server: the handle plus its piped output streams.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawns a workspace server with piped stdio in its own process group.
pub fn spawn_server(cmd: &LauncherCommand) -> WorkspaceResult<SpawnedProcess> {
    let mut command = Command::new(&cmd.binary);
    command
        .args(&cmd.args)
        .envs(&cmd.env)
        .current_dir(&cmd.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Own group so escalation can signal launcher subprocesses too.
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            WorkspaceError::command_not_found(&cmd.binary)
        } else {
            WorkspaceError::spawn_io(format!("failed to spawn `{}`", cmd.binary), err)
        }
    })?;

    let pid = child
        .id()
        .ok_or_else(|| WorkspaceError::spawn_failed("process exited before a pid was assigned"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| WorkspaceError::spawn_failed("stdout pipe missing"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| WorkspaceError::spawn_failed("stderr pipe missing"))?;

    let metadata = ProcessMetadata {
        pid,
        command: cmd.render(),
        working_dir: cmd.working_dir.clone(),
        started_at: Utc::now(),
    };

    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(wait_for_exit(child, pid, exit_tx));

    debug!("spawned `{}` (pid {pid}) in {}", cmd.binary, cmd.working_dir);
    Ok(SpawnedProcess {
        handle: ProcessHandle {
            pid,
            metadata,
            exit_rx,
        },
        stdout,
        stderr,
    })
}

async fn wait_for_exit(mut child: Child, pid: u32, exit_tx: watch::Sender<Option<ProcessExit>>) {
    let exit = match child.wait().await {
        Ok(status) => ProcessExit::from_status(status),
        Err(err) => {
            warn!("waiting on process {pid} failed: {err}");
            ProcessExit::unknown()
        }
    };
    debug!(
        "process {pid} exited (code={:?}, signal={:?})",
        exit.code, exit.signal
    );
    let _ = exit_tx.send(Some(exit));
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn metadata(&self) -> &ProcessMetadata {
        &self.metadata
    }

    /// The published exit, if the process has already terminated.
    pub fn exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// Resolves once the process exits; immediately if it already has.
    pub async fn wait_exit(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(exit) = *rx.borrow_and_update() {
                return exit;
            }
            if rx.changed().await.is_err() {
                // Waiter gone without publishing; nothing left to observe.
                return ProcessExit::unknown();
            }
        }
    }

    /// Liveness probe via the null signal.
    ///
    /// `ESRCH` means gone, `EPERM` means the pid exists but is not ours
    /// (alive), anything else is treated as dead.
    pub fn is_alive(&self) -> bool {
        if self.exit().is_some() {
            return false;
        }
        match send_signal(self.pid as i32, 0) {
            Ok(()) => true,
            Err(err) => err.raw_os_error() == Some(libc::EPERM),
        }
    }

    /// Runs the escalating termination loop. Returns whether the process is
    /// known to be gone; a survivor is logged and left to the caller.
    pub async fn terminate(&self, policy: &TerminationPolicy) -> bool {
        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            if !self.is_alive() {
                return true;
            }
            let final_attempt = attempt == attempts;
            let signal = if policy.force || final_attempt {
                libc::SIGKILL
            } else {
                libc::SIGTERM
            };
            let signal_name = if signal == libc::SIGKILL {
                "SIGKILL"
            } else {
                "SIGTERM"
            };
            debug!(
                "terminating pid {} (attempt {attempt}/{attempts}, {signal_name})",
                self.pid
            );

            // Group first, to catch subprocesses of the launcher.
            if let Err(err) = send_signal(-(self.pid as i32), signal) {
                debug!("group signal to pgid {} failed: {err}", self.pid);
            }
            if let Err(err) = send_signal(self.pid as i32, signal) {
                if err.raw_os_error() == Some(libc::ESRCH) {
                    return true;
                }
                warn!("{signal_name} to pid {} failed: {err}", self.pid);
            }

            if tokio::time::timeout(policy.attempt_timeout, self.wait_exit())
                .await
                .is_ok()
            {
                return true;
            }
            if !final_attempt {
                tokio::time::sleep(policy.backoff * attempt).await;
            }
        }

        let gone = !self.is_alive();
        if !gone {
            warn!(
                "pid {} survived {attempts} termination attempts; leaking it",
                self.pid
            );
        }
        gone
    }
}

fn send_signal(pid: i32, signal: i32) -> io::Result<()> {
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Verifies the launcher binary is present and answers `--version`.
pub async fn probe_version(binary: &str) -> WorkspaceResult<String> {
    let probe = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output();
    match tokio::time::timeout(Duration::from_secs(5), probe).await {
        Ok(Ok(output)) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Ok(Ok(_)) => Err(WorkspaceError::command_not_found(binary)),
        Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => {
            Err(WorkspaceError::command_not_found(binary))
        }
        Ok(Err(err)) => Err(WorkspaceError::spawn_io(
            format!("failed to probe `{binary}`"),
            err,
        )),
        Err(_) => Err(WorkspaceError::spawn_failed(format!(
            "version probe of `{binary}` timed out"
        ))),
    }
}
