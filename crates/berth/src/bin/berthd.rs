//! Foreground supervisor daemon.
//!
//! Starts one workspace per `--folder` argument, keeps them healthy, and
//! tears everything down in order on SIGINT/SIGTERM. All control is via
//! the command line and configuration file.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, error, info, warn};

use berth::workspace::StartWorkspace;
use berth::{BerthConfig, ShutdownCoordinator, WorkspaceSupervisor};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Berth - workspace process supervisor daemon."
)]
struct Cli {
    /// Override the config file path
    #[arg(long, value_name = "PATH", env = "BERTH_CONFIG")]
    config: Option<PathBuf>,
    /// Folder to start a workspace for at launch (repeatable)
    #[arg(short = 'f', long = "folder", value_name = "PATH", requires = "model")]
    folders: Vec<String>,
    /// Model for sessions in launched workspaces
    #[arg(short, long, env = "BERTH_MODEL")]
    model: Option<String>,
    /// Reduce output to only errors
    #[arg(short, long)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
    /// Log in JSON format
    #[arg(long)]
    json: bool,
    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config =
        BerthConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&cli, &config);
    run(cli, config)
}

#[tokio::main]
async fn run(cli: Cli, config: BerthConfig) -> Result<()> {
    let supervisor = WorkspaceSupervisor::new(config.clone());
    let coordinator = ShutdownCoordinator::new(&config.shutdown);
    coordinator.register_supervisor(&supervisor);
    coordinator.install();
    supervisor.spawn_health_monitor();

    supervisor.add_change_listener(|workspaces| {
        let summary: Vec<String> = workspaces
            .iter()
            .map(|w| format!("{}={}", w.id, w.status))
            .collect();
        debug!("registry changed: [{}]", summary.join(", "));
    });

    if !cli.folders.is_empty() {
        let model = cli
            .model
            .clone()
            .context("--model is required when launching workspaces")?;
        let mut running = 0usize;
        for folder in &cli.folders {
            let request = StartWorkspace {
                folder: folder.clone(),
                model: model.clone(),
            };
            match supervisor.start(request).await {
                Ok(workspace) => {
                    info!(
                        "workspace {} serving {} on port {}",
                        workspace.id, workspace.folder, workspace.port
                    );
                    running += 1;
                }
                Err(err) => {
                    error!("failed to start workspace in {folder}: {err}");
                    if let Some(hint) = err.recovery_suggestion() {
                        warn!("{hint}");
                    }
                }
            }
        }
        if running == 0 {
            anyhow::bail!("no workspace could be started");
        }
    }

    info!(
        "berthd running (pid {}); press Ctrl-C to stop",
        std::process::id()
    );
    // Exit happens inside the shutdown coordinator.
    std::future::pending::<()>().await;
    Ok(())
}

fn effective_level(cli: &Cli, config: &BerthConfig) -> LevelFilter {
    if cli.quiet {
        return LevelFilter::Error;
    }
    match cli.verbose {
        0 => config.logging.level.parse().unwrap_or(LevelFilter::Info),
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(cli: &Cli, config: &BerthConfig) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = effective_level(cli, config);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("berth={level},berth_cleanup={level}")));

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .ok();
    }

    // The supervisor library logs through the log crate; env_logger carries
    // those records.
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(level);
    builder.try_init().ok();
}
