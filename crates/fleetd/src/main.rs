//! fleetd: the FleetGrid daemon.
//!
//! Single binary that assembles the deployment orchestrator:
//! - State store (redb): run history, backup index, artifact objects
//! - Fleet registry and remote command clients (HTTP)
//! - Notification sinks (log, optional webhook)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd serve --config /etc/fleetgrid/fleet.toml --data-dir /var/lib/fleetgrid
//! fleetd deploy --config fleet.toml --group frontend --artifact build.tgz
//! fleetd history --group frontend
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use fleetgrid_core::ArtifactVersion;
use fleetgrid_rollout::{ArtifactPublisher, ArtifactSource, DeployRequest, GateSignal, GateStatus};
use fleetgrid_state::{RunVerdict, StateStore};

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid deployment orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator with its REST API.
    Serve {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,
    },
    /// Run one deployment in the foreground.
    Deploy {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        #[arg(long)]
        group: String,

        /// Build output to ship.
        #[arg(long)]
        artifact: PathBuf,

        #[arg(long, value_enum, default_value = "manual")]
        gate: GateArg,

        /// Upstream build identifier.
        #[arg(long)]
        run_ref: Option<String>,

        #[arg(long, default_value = "cli")]
        triggered_by: String,
    },
    /// Stage an artifact and make it current without deploying it.
    Publish {
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        #[arg(long)]
        group: String,

        #[arg(long)]
        artifact: PathBuf,
    },
    /// Show run history of a group, newest first.
    History {
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        #[arg(long)]
        group: String,

        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Delete all but the newest backups of a target.
    Prune {
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        #[arg(long)]
        target: String,

        #[arg(long)]
        keep: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GateArg {
    Success,
    Failure,
    Cancelled,
    Manual,
}

impl From<GateArg> for GateStatus {
    fn from(arg: GateArg) -> Self {
        match arg {
            GateArg::Success => GateStatus::Success,
            GateArg::Failure => GateStatus::Failure,
            GateArg::Cancelled => GateStatus::Cancelled,
            GateArg::Manual => GateStatus::Manual,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleetgrid=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            data_dir,
            port,
        } => daemon::serve(&config, &data_dir, port).await,
        Command::Deploy {
            config,
            data_dir,
            group,
            artifact,
            gate,
            run_ref,
            triggered_by,
        } => {
            let bytes = std::fs::read(&artifact)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", artifact.display()))?;
            let orchestrator = daemon::assemble(&config, daemon::open_store(&data_dir)?)?;
            orchestrator.recover_interrupted().await?;

            let run = orchestrator
                .deploy(DeployRequest {
                    group,
                    artifact: ArtifactSource::Bytes(bytes),
                    gate: GateSignal {
                        status: gate.into(),
                        run_ref,
                        triggered_by,
                    },
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
            match run.verdict {
                Some(RunVerdict::Success) | Some(RunVerdict::NoOp) => Ok(()),
                Some(verdict) => anyhow::bail!("deployment {} ended {verdict}", run.id),
                None => anyhow::bail!("deployment {} did not finish", run.id),
            }
        }
        Command::Publish {
            data_dir,
            group,
            artifact,
        } => {
            let bytes = std::fs::read(&artifact)
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", artifact.display()))?;
            let store = daemon::open_store(&data_dir)?;
            let publisher = ArtifactPublisher::new(std::sync::Arc::new(store));
            let version: ArtifactVersion = publisher.publish(&group, &bytes).await?;
            info!(%group, %version, "artifact published");
            println!("{version}");
            Ok(())
        }
        Command::History {
            data_dir,
            group,
            limit,
        } => {
            let store = daemon::open_store(&data_dir)?;
            for run in store.list_runs_for_group(&group, limit)? {
                let verdict = run.verdict.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
                let version = run
                    .artifact_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:>13}  {:<11}  {:<12}  targets={}  by={}",
                    run.id,
                    run.started_at,
                    verdict,
                    version,
                    run.targets.len(),
                    run.triggered_by
                );
            }
            Ok(())
        }
        Command::Prune {
            data_dir,
            target,
            keep,
        } => {
            let store: StateStore = daemon::open_store(&data_dir)?;
            let deleted = store.prune_backups(&target, keep)?;
            println!("pruned {deleted} backup(s) of {target}");
            Ok(())
        }
    }
}
