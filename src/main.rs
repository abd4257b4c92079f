//! # Tenancy Controller
//!
//! Runs every registered controller against the Kubernetes API until SIGINT
//! or SIGTERM, then drains them.

use anyhow::Result;
use std::sync::Arc;
use tenancy_controller::controller::clock::SystemClock;
use tenancy_controller::controller::registry::ControllerRegistry;
use tenancy_controller::controller::team;
use tenancy_controller::runtime::{initialize, track_readiness, ProcessSupervisor};
use tenancy_controller::store::StoreBackend;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    let mut registry = ControllerRegistry::new();
    team::register(&mut registry)?;

    let mut supervisor = ProcessSupervisor::new(
        registry,
        StoreBackend::Kube(init.client),
        init.config,
        Arc::new(SystemClock),
    );
    supervisor.start().await?;
    let readiness = tokio::spawn(track_readiness(
        supervisor.readiness(),
        Arc::clone(&init.server_state),
    ));

    shutdown_signal().await?;
    info!("Shutdown signal received, stopping controllers...");
    readiness.abort();
    init.server_state.set_ready(false);
    supervisor.stop().await;

    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
