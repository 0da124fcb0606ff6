//! Orchestrator assembly and the long-running server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use fleetgrid_core::FleetConfig;
use fleetgrid_remote::{HttpCommandApi, HttpFleetRegistry, WebhookNotifier};
use fleetgrid_rollout::{FanoutNotifier, LogNotifier, Orchestrator};
use fleetgrid_state::StateStore;

pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let db_path = data_dir.join("fleetgrid.redb");
    let store = StateStore::open(&db_path)
        .with_context(|| format!("opening state store at {}", db_path.display()))?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

/// Build an orchestrator from `fleet.toml` over an opened state store.
pub fn assemble(config_path: &Path, store: StateStore) -> anyhow::Result<Orchestrator> {
    let config = FleetConfig::from_file(config_path)?;

    let registry = config
        .registry
        .as_ref()
        .context("fleet.toml has no [registry] section")?;
    let commands = config
        .commands
        .as_ref()
        .context("fleet.toml has no [commands] section")?;

    let mut notifier = FanoutNotifier::new().with(Arc::new(LogNotifier));
    if let Some(webhook) = &config.notify.webhook {
        notifier = notifier.with(Arc::new(WebhookNotifier::new(webhook)));
        info!(%webhook, "webhook notifications enabled");
    }

    info!(
        groups = config.groups.len(),
        registry = %registry.url,
        commands = %commands.url,
        on_conflict = ?config.orchestrator.on_conflict,
        "orchestrator configured"
    );
    let registry =
        Arc::new(HttpFleetRegistry::new(&registry.url).with_timeout(registry.request_timeout()));
    let commands =
        Arc::new(HttpCommandApi::new(&commands.url).with_timeout(commands.request_timeout()));

    Ok(Orchestrator::new(
        config,
        store.clone(),
        Arc::new(store),
        registry,
        commands,
        Arc::new(notifier),
    ))
}

pub async fn serve(config_path: &Path, data_dir: &Path, port: u16) -> anyhow::Result<()> {
    info!("FleetGrid daemon starting");

    let store = open_store(data_dir)?;
    let orchestrator = Arc::new(assemble(config_path, store.clone())?);

    let recovered = orchestrator.recover_interrupted().await?;
    if !recovered.is_empty() {
        warn!(count = recovered.len(), "finalized runs interrupted by a previous shutdown");
    }

    let router = fleetgrid_api::build_router(Arc::clone(&orchestrator), store);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C: stop taking requests, then let runs
    // already in flight reach a terminal stage.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    orchestrator.drain().await;
    info!("FleetGrid daemon stopped");
    Ok(())
}
