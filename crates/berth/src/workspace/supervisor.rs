//! The workspace supervisor.
//!
//! Owns the in-memory registry of workspaces, spawns and tears down their
//! server processes, multiplexes sessions onto them, and feeds change
//! listeners. Mutations to a single workspace are serialized through its
//! registry entry; long waits (termination, handshake) happen with the
//! entry released and the process handle taken out, so operations on other
//! workspaces proceed in parallel.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

use crate::config::BerthConfig;
use crate::error::{WorkspaceError, WorkspaceResult};
use crate::launcher::process::{
    self, LauncherCommand, ProcessExit, ProcessHandle, SpawnedProcess, TerminationPolicy,
};
use crate::launcher::ready::{ListenLineDetector, ReadySignalDetector, ServerAddr};
use crate::opencode::OpencodeClient;
use crate::workspace::models::{
    Session, SessionStatus, StartWorkspace, Workspace, WorkspaceFailure, WorkspaceStatus,
};
use crate::workspace::monitor;

/// Per-call overrides for [`WorkspaceSupervisor::stop`]; unset fields fall
/// back to the configured stop policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    pub timeout: Option<Duration>,
    pub retry_attempts: Option<u32>,
    pub force_kill: bool,
}

/// Token returned by [`WorkspaceSupervisor::add_change_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ChangeListener = Arc<dyn Fn(&[Workspace]) + Send + Sync>;

struct WorkspaceEntry {
    workspace: Workspace,
    /// Live process handle; exactly one owner. Taken out by an explicit
    /// stop (or teardown) before termination runs.
    process: Option<ProcessHandle>,
    /// Resolves the blocked `start` call once the workspace reaches
    /// `Running` or fails.
    startup_tx: Option<oneshot::Sender<WorkspaceResult<Workspace>>>,
}

struct SupervisorInner {
    config: BerthConfig,
    detector: Arc<dyn ReadySignalDetector>,
    registry: DashMap<String, WorkspaceEntry>,
    listeners: DashMap<u64, ChangeListener>,
    listener_seq: AtomicU64,
    last_modified_ms: AtomicI64,
    shutting_down: AtomicBool,
}

/// Supervises one external server process per workspace.
///
/// Cheap to clone. Construct once at process startup and pass it down;
/// there is deliberately no global instance.
#[derive(Clone)]
pub struct WorkspaceSupervisor {
    inner: Arc<SupervisorInner>,
}

impl WorkspaceSupervisor {
    pub fn new(config: BerthConfig) -> Self {
        Self::with_detector(config, Arc::new(ListenLineDetector))
    }

    /// Builds a supervisor with a custom ready-signal detector, for
    /// launchers with a different announcement format.
    pub fn with_detector(config: BerthConfig, detector: Arc<dyn ReadySignalDetector>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                detector,
                registry: DashMap::new(),
                listeners: DashMap::new(),
                listener_seq: AtomicU64::new(0),
                last_modified_ms: AtomicI64::new(Utc::now().timestamp_millis()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &BerthConfig {
        &self.inner.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Starts a workspace: spawns the launcher in the folder, waits for the
    /// ready signal and handshake, and returns the running workspace.
    ///
    /// Blocks up to the configured startup timeout. On any failure the
    /// registry entry is removed and any spawned process is terminated
    /// best-effort; the spawn is never retried.
    pub async fn start(&self, request: StartWorkspace) -> WorkspaceResult<Workspace> {
        if self.is_shutting_down() {
            return Err(WorkspaceError::ShutdownInProgress);
        }

        let binary = self.inner.config.launcher.expanded_binary();
        let version = process::probe_version(&binary).await?;
        debug!("launcher `{binary}` present ({version})");

        if !Path::new(&request.folder).is_dir() {
            return Err(WorkspaceError::spawn_failed(format!(
                "workspace folder `{}` does not exist",
                request.folder
            )));
        }

        let command = LauncherCommand {
            binary,
            args: self.inner.config.launcher.args.clone(),
            env: self.inner.config.launcher.env.clone(),
            working_dir: request.folder.clone(),
        };
        let spawned = process::spawn_server(&command)?;
        let handle = spawned.handle.clone();

        let mut workspace = Workspace::new(&request.folder, &request.model);
        workspace.process = Some(handle.metadata().clone());
        let id = workspace.id.clone();
        info!(
            "workspace {id} starting in {} (pid {})",
            request.folder,
            handle.pid()
        );

        let (startup_tx, startup_rx) = oneshot::channel();
        self.inner.registry.insert(
            id.clone(),
            WorkspaceEntry {
                workspace,
                process: Some(handle.clone()),
                startup_tx: Some(startup_tx),
            },
        );
        self.touch_and_notify();
        self.spawn_observers(&id, spawned, handle);

        // Shutdown may have begun while we were suspended on the probe or
        // the spawn. The flag is set before the teardown snapshot is taken:
        // an entry the snapshot caught is stopped there, and one it missed
        // is caught here. Without this re-check the process would outlive
        // the shutdown unreaped.
        if self.is_shutting_down() {
            self.abort_startup(&id, WorkspaceError::ShutdownInProgress);
            return Err(WorkspaceError::ShutdownInProgress);
        }

        let timeout = self.inner.config.startup.timeout();
        match tokio::time::timeout(timeout, startup_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                // Verdict channel dropped without resolution; the entry is
                // already being torn down elsewhere.
                Err(WorkspaceError::spawn_failed("startup aborted unexpectedly"))
            }
            Err(_) => {
                warn!(
                    "workspace {id} did not become ready within {}s",
                    timeout.as_secs()
                );
                self.abort_startup(
                    &id,
                    WorkspaceError::StartupTimeout {
                        timeout_secs: timeout.as_secs(),
                    },
                );
                Err(WorkspaceError::StartupTimeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Stops a workspace: clears its sessions, terminates the process with
    /// escalation, and removes the registry entry regardless of the
    /// termination outcome (a survivor is logged as a leak).
    pub async fn stop(&self, id: &str, opts: StopOptions) -> WorkspaceResult<()> {
        let handle = {
            let mut entry = self
                .inner
                .registry
                .get_mut(id)
                .ok_or_else(|| WorkspaceError::not_found(id))?;
            if !entry.workspace.sessions.is_empty() {
                debug!(
                    "clearing {} session(s) of workspace {id}",
                    entry.workspace.sessions.len()
                );
                entry.workspace.sessions.clear();
            }
            if let Some(tx) = entry.startup_tx.take() {
                let _ = tx.send(Err(WorkspaceError::spawn_failed(
                    "workspace was stopped during startup",
                )));
            }
            entry.process.take()
        };

        match handle {
            Some(handle) => {
                info!("stopping workspace {id} (pid {})", handle.pid());
                let policy = self.stop_policy(&opts);
                if !handle.terminate(&policy).await {
                    warn!(
                        "workspace {id} process (pid {}) not confirmed dead; removing entry anyway",
                        handle.pid()
                    );
                }
            }
            None => debug!("workspace {id} owns no process; removing entry"),
        }

        if let Some((_, mut entry)) = self.inner.registry.remove(id) {
            entry.workspace.status = WorkspaceStatus::Stopped;
            entry.workspace.process = None;
            info!("workspace {id} stopped");
            self.touch_and_notify();
        }
        Ok(())
    }

    /// Stops every workspace concurrently, best-effort.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.inner.registry.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return;
        }
        info!("stopping {} workspace(s)", ids.len());
        let stops = ids.into_iter().map(|id| {
            let supervisor = self.clone();
            async move {
                if let Err(err) = supervisor.stop(&id, StopOptions::default()).await {
                    warn!("failed to stop workspace {id}: {err}");
                }
            }
        });
        join_all(stops).await;
    }

    /// Shutdown entry point: refuses new workspaces from this point on,
    /// then stops everything. This is what the cleanup handler runs.
    pub async fn shutdown_all(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        self.stop_all().await;
    }

    pub fn get(&self, id: &str) -> Option<Workspace> {
        self.inner.registry.get(id).map(|e| e.workspace.clone())
    }

    pub fn list(&self) -> Vec<Workspace> {
        let mut list: Vec<Workspace> = self
            .inner
            .registry
            .iter()
            .map(|e| e.workspace.clone())
            .collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    /// Creates a session on a running workspace's server and records it.
    pub async fn create_session(
        &self,
        workspace_id: &str,
        model: impl Into<String>,
    ) -> WorkspaceResult<Session> {
        let model = model.into();
        let (client, port) = {
            let entry = self
                .inner
                .registry
                .get(workspace_id)
                .ok_or_else(|| WorkspaceError::not_found(workspace_id))?;
            if entry.workspace.status != WorkspaceStatus::Running {
                return Err(WorkspaceError::session_failed(format!(
                    "workspace is {}, not running",
                    entry.workspace.status
                )));
            }
            let client = entry
                .workspace
                .client
                .clone()
                .ok_or_else(|| WorkspaceError::session_failed("workspace has no server client"))?;
            (client, entry.workspace.port)
        };

        let server_session = client.create_session().await.map_err(|err| {
            WorkspaceError::session_failed(format!("server rejected session creation: {err}"))
        })?;

        let now = Utc::now();
        let session = Session {
            id: server_session.id,
            workspace_id: workspace_id.to_string(),
            model,
            port,
            created_at: now,
            last_activity: now,
            status: SessionStatus::Active,
        };
        {
            let mut entry = self
                .inner
                .registry
                .get_mut(workspace_id)
                .ok_or_else(|| WorkspaceError::not_found(workspace_id))?;
            entry
                .workspace
                .sessions
                .insert(session.id.clone(), session.clone());
        }
        info!("session {} created on workspace {workspace_id}", session.id);
        self.touch_and_notify();
        Ok(session)
    }

    /// Removes a session record. Local bookkeeping only.
    pub fn delete_session(&self, workspace_id: &str, session_id: &str) -> WorkspaceResult<bool> {
        let removed = {
            let mut entry = self
                .inner
                .registry
                .get_mut(workspace_id)
                .ok_or_else(|| WorkspaceError::not_found(workspace_id))?;
            entry.workspace.sessions.remove(session_id).is_some()
        };
        if removed {
            debug!("session {session_id} deleted from workspace {workspace_id}");
            self.touch_and_notify();
        }
        Ok(removed)
    }

    pub fn get_session(&self, workspace_id: &str, session_id: &str) -> Option<Session> {
        self.inner
            .registry
            .get(workspace_id)
            .and_then(|e| e.workspace.sessions.get(session_id).cloned())
    }

    pub fn list_sessions(&self, workspace_id: &str) -> WorkspaceResult<Vec<Session>> {
        let entry = self
            .inner
            .registry
            .get(workspace_id)
            .ok_or_else(|| WorkspaceError::not_found(workspace_id))?;
        let mut sessions: Vec<Session> = entry.workspace.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// Bumps a session's activity marker and re-activates it.
    pub fn touch_session(&self, workspace_id: &str, session_id: &str) -> WorkspaceResult<bool> {
        let touched = {
            let mut entry = self
                .inner
                .registry
                .get_mut(workspace_id)
                .ok_or_else(|| WorkspaceError::not_found(workspace_id))?;
            match entry.workspace.sessions.get_mut(session_id) {
                Some(session) => {
                    session.last_activity = Utc::now();
                    session.status = SessionStatus::Active;
                    true
                }
                None => false,
            }
        };
        if touched {
            self.touch_and_notify();
        }
        Ok(touched)
    }

    /// Registers a callback invoked with the full workspace list after
    /// every registry mutation. A panicking callback is caught and logged.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&[Workspace]) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.inner.listener_seq.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.insert(id, Arc::new(listener));
        ListenerId(id)
    }

    pub fn remove_change_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(&id.0).is_some()
    }

    /// Strictly increasing change marker for cheap polling.
    pub fn last_modified(&self) -> DateTime<Utc> {
        let ms = self.inner.last_modified_ms.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Spawns the background health monitor for this supervisor.
    pub fn spawn_health_monitor(&self) -> tokio::task::JoinHandle<()> {
        monitor::spawn(self.clone())
    }

    fn stop_policy(&self, opts: &StopOptions) -> TerminationPolicy {
        let mut policy = self.inner.config.stop.policy();
        if let Some(timeout) = opts.timeout {
            policy.attempt_timeout = timeout;
        }
        if let Some(attempts) = opts.retry_attempts {
            policy.attempts = attempts;
        }
        policy.force = policy.force || opts.force_kill;
        policy
    }

    fn spawn_observers(&self, id: &str, spawned: SpawnedProcess, handle: ProcessHandle) {
        let SpawnedProcess { stdout, stderr, .. } = spawned;

        // stdout scanner: first ready signal wins.
        {
            let supervisor = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut ready = false;
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[{id}] stdout: {line}");
                    if !ready {
                        if let Some(addr) = supervisor.inner.detector.detect(&line) {
                            ready = true;
                            supervisor.on_ready_signal(&id, addr).await;
                        }
                    }
                    // Keep draining after readiness so the pipe never fills.
                }
            });
        }

        // stderr watcher: output while starting is fatal.
        {
            let supervisor = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if supervisor.status_of(&id) == Some(WorkspaceStatus::Starting) {
                        warn!("[{id}] launcher stderr during startup: {trimmed}");
                        supervisor.abort_startup(
                            &id,
                            WorkspaceError::spawn_failed(format!("launcher error: {trimmed}")),
                        );
                    } else {
                        debug!("[{id}] stderr: {trimmed}");
                    }
                }
            });
        }

        // exit watcher: routes unsolicited exits.
        {
            let supervisor = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                let exit = handle.wait_exit().await;
                supervisor.on_process_exit(&id, exit);
            });
        }
    }

    async fn on_ready_signal(&self, id: &str, addr: ServerAddr) {
        {
            let Some(mut entry) = self.inner.registry.get_mut(id) else {
                return;
            };
            if entry.workspace.status != WorkspaceStatus::Starting {
                return;
            }
            entry.workspace.port = addr.port;
        }
        self.touch_and_notify();

        let client = OpencodeClient::new(addr.base_url(), addr.port);
        debug!("workspace {id} announced {}; handshaking", client.base_url());
        match client.initialize().await {
            Ok(_) => self.complete_startup(id, client),
            Err(err) => self.abort_startup(
                id,
                WorkspaceError::handshake_failed(client.base_url(), err.to_string()),
            ),
        }
    }

    fn complete_startup(&self, id: &str, client: OpencodeClient) {
        let snapshot = {
            let Some(mut entry) = self.inner.registry.get_mut(id) else {
                return; // removed while handshaking
            };
            // A taken handle means a stop or exit won the race.
            if entry.workspace.status != WorkspaceStatus::Starting || entry.process.is_none() {
                return;
            }
            entry.workspace.status = WorkspaceStatus::Running;
            entry.workspace.client = Some(client);
            let snapshot = entry.workspace.clone();
            if let Some(tx) = entry.startup_tx.take() {
                let _ = tx.send(Ok(snapshot.clone()));
            }
            snapshot
        };
        info!("workspace {id} running on port {}", snapshot.port);
        self.touch_and_notify();
    }

    /// Tears down a workspace that failed before `Running`: resolves the
    /// pending start, terminates any residual process in the background,
    /// removes the entry.
    fn abort_startup(&self, id: &str, failure: WorkspaceError) {
        let Some((_, mut entry)) = self.inner.registry.remove(id) else {
            return;
        };
        let message = failure.to_string();
        error!("workspace {id} failed to start: {message}");
        entry.workspace.status = WorkspaceStatus::Error;
        entry.workspace.error = Some(WorkspaceFailure::now(message));
        if let Some(handle) = entry.process.take() {
            if handle.exit().is_none() {
                let policy = self.inner.config.stop.policy();
                tokio::spawn(async move {
                    handle.terminate(&policy).await;
                });
            }
        }
        if let Some(tx) = entry.startup_tx.take() {
            let _ = tx.send(Err(failure));
        }
        self.touch_and_notify();
    }

    /// Unsolicited process exit: non-zero before `Running` is a crash,
    /// anything else is a normal stop. The entry is removed either way.
    fn on_process_exit(&self, id: &str, exit: ProcessExit) {
        // Explicit stops take the handle out first; if it is still attached
        // this exit arrived on its own.
        let Some((_, mut entry)) = self
            .inner
            .registry
            .remove_if(id, |_, e| e.process.is_some())
        else {
            return;
        };

        let describe = match (exit.code, exit.signal) {
            (Some(code), _) => format!("exited with code {code}"),
            (None, Some(signal)) => format!("killed by signal {signal}"),
            (None, None) => "exited with unknown status".to_string(),
        };
        let was_running = entry.workspace.status == WorkspaceStatus::Running;
        let crashed = !was_running && !exit.clean();

        entry.workspace.sessions.clear();
        entry.workspace.process = None;
        entry.process = None;
        if crashed {
            warn!("workspace {id} process {describe} before becoming ready");
            entry.workspace.status = WorkspaceStatus::Error;
            let failure = WorkspaceError::crashed(
                exit.code,
                format!("process {describe} before becoming ready"),
            );
            entry.workspace.error = Some(WorkspaceFailure::now(failure.to_string()));
            if let Some(tx) = entry.startup_tx.take() {
                let _ = tx.send(Err(failure));
            }
        } else {
            info!("workspace {id} process {describe}; removing entry");
            entry.workspace.status = WorkspaceStatus::Stopped;
            // A clean exit while still starting also fails the pending
            // start: the workspace never became running.
            if let Some(tx) = entry.startup_tx.take() {
                let _ = tx.send(Err(WorkspaceError::crashed(
                    exit.code,
                    format!("process {describe} before becoming ready"),
                )));
            }
        }
        self.touch_and_notify();
    }

    /// One health-monitor sweep: probe every running workspace's process
    /// and reap the ones that died silently.
    pub(crate) fn health_check_once(&self) {
        let mut dead: Vec<(String, u32)> = Vec::new();
        for entry in self.inner.registry.iter() {
            if entry.workspace.status != WorkspaceStatus::Running {
                continue;
            }
            let Some(handle) = entry.process.as_ref() else {
                continue; // stop in flight
            };
            if !handle.is_alive() {
                dead.push((entry.key().clone(), handle.pid()));
            }
        }
        for (id, pid) in dead {
            warn!("workspace {id} process (pid {pid}) died unexpectedly");
            self.remove_dead(&id);
        }
    }

    fn remove_dead(&self, id: &str) {
        let Some((_, mut entry)) = self
            .inner
            .registry
            .remove_if(id, |_, e| e.process.is_some())
        else {
            return;
        };
        entry.workspace.status = WorkspaceStatus::Error;
        entry.workspace.error = Some(WorkspaceFailure::now("process died unexpectedly"));
        entry.workspace.sessions.clear();
        entry.workspace.process = None;
        if let Some(tx) = entry.startup_tx.take() {
            let _ = tx.send(Err(WorkspaceError::crashed(None, "process died unexpectedly")));
        }
        self.touch_and_notify();
    }

    fn status_of(&self, id: &str) -> Option<WorkspaceStatus> {
        self.inner.registry.get(id).map(|e| e.workspace.status)
    }

    /// Advances the change marker and runs every listener with a fresh
    /// snapshot. Must never be called while holding a registry guard.
    fn touch_and_notify(&self) {
        let now = Utc::now().timestamp_millis();
        let _ = self.inner.last_modified_ms.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |prev| Some(now.max(prev + 1)),
        );

        if self.inner.listeners.is_empty() {
            return;
        }
        let snapshot = self.list();
        let callbacks: Vec<ChangeListener> = self
            .inner
            .listeners
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for callback in callbacks {
            // Contained here; the panic interceptor must not see these.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                crate::shutdown::mask_panics(|| callback(&snapshot))
            }));
            if let Err(panic) = result {
                warn!("change listener panicked: {}", panic_message(panic.as_ref()));
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> WorkspaceSupervisor {
        WorkspaceSupervisor::new(BerthConfig::default())
    }

    #[tokio::test]
    async fn test_get_and_list_empty() {
        let s = supervisor();
        assert!(s.get("missing").is_none());
        assert!(s.list().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_workspace_is_not_found() {
        let s = supervisor();
        let err = s.stop("missing", StopOptions::default()).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::WorkspaceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_session_ops_on_unknown_workspace() {
        let s = supervisor();
        assert!(matches!(
            s.create_session("missing", "m").await.unwrap_err(),
            WorkspaceError::WorkspaceNotFound { .. }
        ));
        assert!(matches!(
            s.delete_session("missing", "ses").unwrap_err(),
            WorkspaceError::WorkspaceNotFound { .. }
        ));
        assert!(s.get_session("missing", "ses").is_none());
        assert!(s.list_sessions("missing").is_err());
    }

    #[tokio::test]
    async fn test_start_refused_during_shutdown() {
        let s = supervisor();
        s.shutdown_all().await;
        let err = s
            .start(StartWorkspace {
                folder: "/tmp".to_string(),
                model: "anthropic/claude-3-5-haiku-20241022".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::ShutdownInProgress));
    }

    #[tokio::test]
    async fn test_listener_registration() {
        let s = supervisor();
        let id = s.add_change_listener(|_| {});
        assert!(s.remove_change_listener(id));
        assert!(!s.remove_change_listener(id));
    }

    #[tokio::test]
    async fn test_last_modified_is_strictly_increasing() {
        let s = supervisor();
        let before = s.last_modified();
        s.touch_and_notify();
        let mid = s.last_modified();
        s.touch_and_notify();
        let after = s.last_modified();
        assert!(mid > before);
        assert!(after > mid);
    }

    #[tokio::test]
    async fn test_stop_policy_merges_overrides() {
        let s = supervisor();
        let policy = s.stop_policy(&StopOptions {
            timeout: Some(Duration::from_millis(100)),
            retry_attempts: Some(2),
            force_kill: true,
        });
        assert_eq!(policy.attempts, 2);
        assert_eq!(policy.attempt_timeout, Duration::from_millis(100));
        assert!(policy.force);

        let defaults = s.stop_policy(&StopOptions::default());
        assert_eq!(defaults.attempts, 3);
        assert_eq!(defaults.attempt_timeout, Duration::from_secs(5));
        assert!(!defaults.force);
    }
}
