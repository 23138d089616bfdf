//! Swarm daemon: discovers and polls miners and serves the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use axe_swarm::api::{self, SharedState};
use axe_swarm::config::SwarmConfig;
use axe_swarm::device_api::{DeviceApi, HttpDeviceApi};
use axe_swarm::scheduler::Scheduler;
use axe_swarm::store::{JsonFileStore, Store};
use axe_swarm::tracing::{self, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = SwarmConfig::from_env()?;
    info!(
        seed = config.seed.as_deref().unwrap_or("(none)"),
        state = %config.state_path.display(),
        "Starting axe-swarm"
    );

    let store: Arc<dyn Store> = Arc::new(
        JsonFileStore::open(&config.state_path)
            .with_context(|| format!("failed to open {}", config.state_path.display()))?,
    );
    let device_api: Arc<dyn DeviceApi> = Arc::new(HttpDeviceApi::new());

    let scheduler = Scheduler::new(device_api.clone(), store, &config);
    let (swarm_cmd_tx, swarm_cmd_rx) = mpsc::channel(16);
    let state = SharedState {
        swarm_cmd_tx,
        swarm_rx: scheduler.subscribe(),
        device_api,
    };

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(scheduler.run(swarm_cmd_rx, running.clone()));
    tracker.spawn({
        let running = running.clone();
        async move {
            if let Err(e) = api::serve(config.listen, state, running.clone()).await {
                error!("{e:#}");
                running.cancel();
            }
        }
    });
    tracker.close();

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = running.cancelled() => {}
    }

    running.cancel();
    tracker.wait().await;
    info!("Exiting.");

    Ok(())
}
