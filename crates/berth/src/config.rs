//! Runtime configuration.
//!
//! All sections have full defaults so an empty config file (or none at all)
//! yields a working setup. Values can be overridden per section via TOML or
//! `BERTH_`-prefixed environment variables (`BERTH_STOP__RETRY_ATTEMPTS=5`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::launcher::process::TerminationPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BerthConfig {
    pub launcher: LauncherConfig,
    pub startup: StartupConfig,
    pub stop: StopConfig,
    pub health: HealthConfig,
    pub shutdown: ShutdownConfig,
    pub logging: LoggingConfig,
}

impl BerthConfig {
    /// Loads configuration from an explicit path, the default location, and
    /// environment overrides, in that precedence order.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("BERTH").separator("__"))
            .build()
            .context("failed to read configuration")?;

        settings
            .try_deserialize()
            .context("invalid configuration")
    }

    /// `~/.config/berth/config.toml` on XDG platforms.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("berth").join("config.toml"))
    }

    /// Renders the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }
}

/// How workspace server processes are launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Launcher binary; looked up on PATH unless absolute. Tilde is expanded.
    pub binary: String,
    /// Arguments passed to the binary. Port 0 lets the server pick a free
    /// port, which it announces on stdout.
    pub args: Vec<String>,
    /// Extra environment variables for the spawned process.
    pub env: HashMap<String, String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            binary: "opencode".to_string(),
            args: vec![
                "serve".to_string(),
                "--port".to_string(),
                "0".to_string(),
                "--hostname".to_string(),
                "127.0.0.1".to_string(),
            ],
            env: HashMap::new(),
        }
    }
}

impl LauncherConfig {
    pub fn expanded_binary(&self) -> String {
        shellexpand::tilde(&self.binary).to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// How long `start` waits for the ready signal plus handshake.
    pub timeout_secs: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl StartupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Termination escalation defaults; `StopOptions` can override per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    pub retry_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub backoff_ms: u64,
    pub force_kill: bool,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            attempt_timeout_ms: 5000,
            backoff_ms: 500,
            force_kill: false,
        }
    }
}

impl StopConfig {
    pub fn policy(&self) -> TerminationPolicy {
        TerminationPolicy {
            attempts: self.retry_attempts,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            backoff: Duration::from_millis(self.backoff_ms),
            force: self.force_kill,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    pub enabled: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            enabled: true,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Budget for the workspace-teardown cleanup handler.
    pub workspace_timeout_ms: u64,
    /// Bound on the whole cleanup run across all handlers.
    pub graceful_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            workspace_timeout_ms: 30_000,
            graceful_timeout_ms: 45_000,
        }
    }
}

impl ShutdownConfig {
    pub fn workspace_timeout(&self) -> Duration {
        Duration::from_millis(self.workspace_timeout_ms)
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BerthConfig::default();
        assert_eq!(config.launcher.binary, "opencode");
        assert_eq!(config.launcher.args[0], "serve");
        assert_eq!(config.startup.timeout_secs, 30);
        assert_eq!(config.stop.retry_attempts, 3);
        assert_eq!(config.stop.attempt_timeout_ms, 5000);
        assert!(!config.stop.force_kill);
        assert_eq!(config.health.interval_secs, 30);
        assert!(config.health.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: BerthConfig = toml::from_str(
            r#"
            [stop]
            retry_attempts = 5

            [launcher]
            binary = "/usr/local/bin/opencode"
            "#,
        )
        .unwrap();

        assert_eq!(config.stop.retry_attempts, 5);
        assert_eq!(config.stop.attempt_timeout_ms, 5000);
        assert_eq!(config.launcher.binary, "/usr/local/bin/opencode");
        assert_eq!(config.launcher.args.len(), 5);
        assert_eq!(config.startup.timeout_secs, 30);
    }

    #[test]
    fn test_stop_policy_conversion() {
        let mut config = StopConfig::default();
        config.retry_attempts = 2;
        config.attempt_timeout_ms = 100;
        let policy = config.policy();
        assert_eq!(policy.attempts, 2);
        assert_eq!(policy.attempt_timeout, Duration::from_millis(100));
        assert!(!policy.force);
    }

    #[test]
    fn test_tilde_expansion() {
        let config = LauncherConfig {
            binary: "~/bin/opencode".to_string(),
            ..LauncherConfig::default()
        };
        let expanded = config.expanded_binary();
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("bin/opencode"));
    }

    #[test]
    fn test_to_toml_round_trip() {
        let config = BerthConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: BerthConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.launcher.binary, config.launcher.binary);
        assert_eq!(parsed.shutdown.graceful_timeout_ms, 45_000);
    }
}
