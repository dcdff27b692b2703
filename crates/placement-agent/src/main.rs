//! Placement agent - adaptive placement engine daemon
//!
//! Hosts one engine instance, runs its periodic adaptation and ordered
//! outcome worker, and serves health, metrics and stats over HTTP.

use anyhow::Result;
use clap::Parser;
use placement_agent::{api, config::AgentSettings};
use placement_core::{
    health::{components, HealthRegistry},
    Orchestrator,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "placement-agent", version, about = "Adaptive placement engine daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "PLACEMENT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    info!("Starting placement-agent");

    let settings = AgentSettings::load(cli.config.as_deref())?;
    info!(
        node_name = %settings.node_name,
        api_port = settings.api_port,
        "Agent configured"
    );

    let engine = Arc::new(
        Orchestrator::new(settings.engine.clone())?.with_node_name(&settings.node_name),
    );
    engine.logger().log_startup(
        AGENT_VERSION,
        settings.engine.objectives.len(),
        settings.engine.seed,
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::DECISION_ENGINE).await;
    health_registry.register(components::LEARNER).await;
    health_registry.register(components::TOOLKIT).await;
    health_registry.register(components::POLICY).await;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let outcomes = Arc::clone(&engine).spawn_outcome_worker(settings.outcome_queue_capacity);
    let adaptation_handle = tokio::spawn(Arc::clone(&engine).run_adaptation_loop(
        Duration::from_secs(settings.adaptation_interval_secs),
        shutdown_tx.subscribe(),
    ));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::clone(&engine),
        outcomes,
    ));

    health_registry.observe_stats(&engine.stats()).await;
    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(api::serve(settings.api_port, app_state));

    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT received",
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => "API server stopped",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    "API server task panicked"
                }
            }
        }
    };

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    if let Err(e) = adaptation_handle.await {
        error!(error = %e, "Adaptation loop task failed");
    }
    api_handle.abort();

    engine.logger().log_shutdown(reason);
    info!("Shutting down");

    Ok(())
}
