//! Wires the supervisor into process-exit handling.
//!
//! The coordinator owns a [`CleanupRegistry`] and installs the process-wide
//! interceptors: SIGINT/SIGTERM run cleanup and exit 0, an unhandled panic
//! runs cleanup and exits 1. Installation is idempotent; cleanup itself runs
//! at most once no matter how many triggers fire.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use berth_cleanup::{CleanupHandler, CleanupRegistry, CleanupReport};
use log::{error, info, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

use crate::config::ShutdownConfig;
use crate::workspace::WorkspaceSupervisor;

/// Workspace teardown runs ahead of any lower-priority handlers an embedder
/// registers (flushing logs, removing pid files, ...).
const WORKSPACE_HANDLER_PRIORITY: i32 = 100;

thread_local! {
    static PANIC_SHIELD: Cell<bool> = const { Cell::new(false) };
}

/// Runs `f` with the panic interceptor masked on this thread, so a panic
/// that the caller catches does not count as unhandled.
pub(crate) fn mask_panics<T>(f: impl FnOnce() -> T) -> T {
    struct Reset;
    impl Drop for Reset {
        fn drop(&mut self) {
            PANIC_SHIELD.with(|cell| cell.set(false));
        }
    }
    PANIC_SHIELD.with(|cell| cell.set(true));
    let _reset = Reset;
    f()
}

fn panics_masked() -> bool {
    PANIC_SHIELD.with(|cell| cell.get())
}

struct CoordinatorInner {
    registry: CleanupRegistry,
    installed: AtomicBool,
}

/// Coordinates ordered, bounded-time process shutdown.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ShutdownCoordinator {
    pub fn new(config: &ShutdownConfig) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                registry: CleanupRegistry::with_graceful_timeout(config.graceful_timeout()),
                installed: AtomicBool::new(false),
            }),
        }
    }

    /// The underlying registry, for registering additional handlers.
    pub fn registry(&self) -> &CleanupRegistry {
        &self.inner.registry
    }

    /// Registers the supervisor's full teardown as the highest-priority
    /// cleanup handler.
    pub fn register_supervisor(&self, supervisor: &WorkspaceSupervisor) {
        let timeout = supervisor.config().shutdown.workspace_timeout();
        let supervisor = supervisor.clone();
        self.inner.registry.register(
            CleanupHandler::new("workspaces", move || {
                let supervisor = supervisor.clone();
                async move {
                    supervisor.shutdown_all().await;
                    Ok(())
                }
            })
            .with_priority(WORKSPACE_HANDLER_PRIORITY)
            .with_timeout(timeout),
        );
    }

    /// Installs the signal listener and panic interceptor. Every call after
    /// the first is a no-op.
    pub fn install(&self) {
        if self.inner.installed.swap(true, Ordering::SeqCst) {
            warn!("shutdown interceptors already installed, ignoring");
            return;
        }
        self.spawn_signal_listener();
        self.install_panic_hook();
    }

    /// Runs cleanup without exiting the process. For embedders that manage
    /// their own exit; the daemon path goes through the interceptors.
    pub async fn initiate(&self, reason: &str) -> CleanupReport {
        self.inner.registry.initiate_shutdown(reason).await
    }

    /// Runs cleanup, then exits the process with `code`. Never returns.
    /// For host code that decides to terminate outside the interceptors.
    pub async fn shutdown_and_exit(&self, reason: &str, code: i32) {
        let report = self.inner.registry.initiate_shutdown(reason).await;
        if !report.completed() {
            warn!(
                "shutdown incomplete after {:?}; exiting anyway",
                report.elapsed
            );
        }
        std::process::exit(code);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.registry.is_shutting_down()
    }

    fn spawn_signal_listener(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let sigterm = async {
                match signal(SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(err) => {
                        warn!("cannot install SIGTERM handler: {err}");
                        std::future::pending::<()>().await;
                    }
                }
            };
            let reason = tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm => "SIGTERM",
            };

            info!("{reason} received, shutting down");
            coordinator.shutdown_and_exit(reason, 0).await;
        });
    }

    /// Forwards unhandled panics from any thread into the cleanup run.
    /// Panics raised under [`mask_panics`] are deliberately contained by
    /// their caller and skipped here.
    fn install_panic_hook(&self) {
        let (panic_tx, mut panic_rx) = mpsc::unbounded_channel::<String>();

        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if panics_masked() {
                return;
            }
            previous(info);
            let summary = match info.location() {
                Some(location) => format!("panic at {}:{}", location.file(), location.line()),
                None => "panic at unknown location".to_string(),
            };
            let _ = panic_tx.send(summary);
        }));

        let coordinator = self.clone();
        tokio::spawn(async move {
            if let Some(summary) = panic_rx.recv().await {
                error!("{summary}; running emergency cleanup");
                coordinator.shutdown_and_exit(&summary, 1).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BerthConfig;

    fn coordinator() -> ShutdownCoordinator {
        ShutdownCoordinator::new(&ShutdownConfig::default())
    }

    #[tokio::test]
    async fn test_register_supervisor_adds_workspace_handler() {
        let coordinator = coordinator();
        let supervisor = WorkspaceSupervisor::new(BerthConfig::default());
        coordinator.register_supervisor(&supervisor);
        assert_eq!(coordinator.registry().handler_names(), vec!["workspaces"]);
    }

    #[tokio::test]
    async fn test_initiate_tears_down_supervisor() {
        let coordinator = coordinator();
        let supervisor = WorkspaceSupervisor::new(BerthConfig::default());
        coordinator.register_supervisor(&supervisor);

        let report = coordinator.initiate("test").await;
        assert!(report.completed());
        assert!(coordinator.is_shutting_down());
        assert!(supervisor.is_shutting_down());
    }

    #[test]
    fn test_mask_panics_resets_after_unwind() {
        let caught = std::panic::catch_unwind(|| mask_panics(|| panic!("contained")));
        assert!(caught.is_err());
        assert!(!panics_masked());
    }

    #[test]
    fn test_mask_panics_passes_through_value() {
        assert_eq!(mask_panics(|| 7), 7);
        assert!(!panics_masked());
    }
}
