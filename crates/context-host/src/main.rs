//! Context Host - main entry point
//!
//! Starts the host with configuration from the environment, serves the
//! discovered units until interrupted, then shuts down and exits with the
//! shutdown status.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use context_host::{EmbeddedRuntime, HostConfig, LifecycleState, LocalManagement, Orchestrator};
use context_host_sdk::ManagementRegistry;

/// How long stopped connectors may keep serving in-flight requests
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,context_host=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting context host");

    let config = HostConfig::from_env();
    tracing::info!("Configuration loaded: {:?}", config);

    let runtime = Arc::new(EmbeddedRuntime::new(&config.engine_name, &config.host_name));
    let management = Arc::new(LocalManagement::new());
    let mut orchestrator = Orchestrator::new(config, runtime.clone(), management.clone());

    let state = orchestrator.start()?;
    if state == LifecycleState::Degraded {
        tracing::error!("Host runtime did not start, shutting down");
        orchestrator.shutdown();
        management.shutdown();
        std::process::exit(1);
    }

    for addr in runtime.local_addrs() {
        tracing::info!("Serving {} contexts on http://{}", orchestrator.registry().len(), addr);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");

    let status = orchestrator.shutdown();
    if !runtime.drain(DRAIN_TIMEOUT).await {
        tracing::warn!("Exiting with requests still in flight");
    }
    management.shutdown();

    std::process::exit(status.exit_code());
}
