//! Test utilities and common setup.
//!
//! Workspace servers are stand-in shell scripts that honor the launcher
//! contract (answer `--version`, announce a listen address on stdout), and
//! the opencode HTTP API is a local axum stub.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde_json::json;

use berth::BerthConfig;
use berth::workspace::StartWorkspace;

/// Model id used by the original test suite.
pub const TEST_MODEL: &str = "anthropic/claude-3-5-haiku-20241022";

/// Local stand-in for the opencode HTTP API.
pub struct StubServer {
    pub port: u16,
    handle: tokio::task::JoinHandle<()>,
}

impl StubServer {
    /// Starts a stub that answers the handshake and session creation.
    pub async fn start() -> Self {
        Self::spawn(false).await
    }

    /// Starts a stub whose session endpoint always fails with a 500.
    pub async fn failing_sessions() -> Self {
        Self::spawn(true).await
    }

    async fn spawn(fail_sessions: bool) -> Self {
        let counter = Arc::new(AtomicU64::new(0));
        let session = move || {
            let counter = Arc::clone(&counter);
            async move {
                if fail_sessions {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": "session store unavailable" })),
                    );
                }
                let n = counter.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::OK,
                    Json(json!({ "id": format!("ses_{n:04}"), "title": "stub session" })),
                )
            }
        };
        let app = Router::new()
            .route(
                "/app",
                get(|| async { Json(json!({ "hostname": "127.0.0.1", "version": "0.0.0-stub" })) }),
            )
            .route("/session", post(session));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub server");
        let port = listener.local_addr().expect("stub server addr").port();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Self { port, handle }
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Writes an executable launcher script into `dir` and returns its path.
///
/// The script answers `--version` like the real CLI; any other invocation
/// runs `body`.
pub fn write_launcher(dir: &Path, body: &str) -> String {
    write_launcher_script(dir, "", body)
}

/// Like [`write_launcher`], but the `--version` answer stalls for
/// `delay_secs` first. Holds a caller inside the version probe for a
/// controlled window.
pub fn write_slow_probe_launcher(dir: &Path, delay_secs: u32, body: &str) -> String {
    write_launcher_script(dir, &format!("sleep {delay_secs}; "), body)
}

fn write_launcher_script(dir: &Path, probe_prefix: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-opencode");
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then {probe_prefix}echo \"0.0.0-test\"; exit 0; fi\n{body}\n"
    );
    std::fs::write(&path, script).expect("write launcher script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("mark launcher executable");
    path.to_string_lossy().into_owned()
}

/// Launcher body that announces the given port and then idles.
pub fn announce_and_serve(port: u16) -> String {
    format!("echo \"server listening on http://127.0.0.1:{port}\"\nexec sleep 600")
}

/// Configuration with fast timeouts pointed at a scripted launcher.
pub fn test_config(launcher: String) -> BerthConfig {
    let mut config = BerthConfig::default();
    config.launcher.binary = launcher;
    config.launcher.args = Vec::new();
    config.startup.timeout_secs = 10;
    config.stop.retry_attempts = 3;
    config.stop.attempt_timeout_ms = 1000;
    config.stop.backoff_ms = 50;
    config.health.interval_secs = 1;
    config
}

pub fn start_request(folder: &Path) -> StartWorkspace {
    StartWorkspace {
        folder: folder.to_string_lossy().into_owned(),
        model: TEST_MODEL.to_string(),
    }
}

/// Polls `probe` every 25ms until it yields a value, for up to 5 seconds.
pub async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(value) = probe() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached within 5s");
}
