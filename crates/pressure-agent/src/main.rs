//! Pressure Agent - node-local CPU pressure controller
//!
//! This binary runs as a DaemonSet on each Kubernetes node. It taints the
//! node while CPU pressure is high and evicts pods when it gets worse.

use anyhow::{Context, Result};
use pressure_lib::{
    api,
    controller::Controller,
    health::{components, HealthRegistry},
    observability::{ControllerMetrics, StructuredLogger},
    platform::{init_kube_client, ClusterClient, KubeClusterClient},
    source::create_load_source,
    watcher::PressureWatcher,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting pressure-agent");

    let config = config::AgentConfig::load().context("Invalid configuration")?;
    info!(
        node_name = %config.node_name,
        taint_threshold = config.taint_threshold,
        evict_threshold = config.evict_threshold,
        "Agent configured"
    );

    let kube_client = init_kube_client(config.kubeconfig.clone()).await?;
    let cluster: Arc<dyn ClusterClient> =
        Arc::new(KubeClusterClient::new(kube_client, config.node_name.clone()));

    let source = create_load_source(config.metric_source, &config.proc_root).await?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::WATCHER).await;

    let metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let mut controller = Controller::new(
        cluster,
        config.controller_config(),
        metrics,
        health_registry.clone(),
    );
    let initially_high = controller.bootstrap().await;

    logger.log_startup(AGENT_VERSION, &source.kind().to_string(), controller.is_tainted());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (watcher, outputs) =
        PressureWatcher::new(source, config.watcher_config(), initially_high);
    let watcher_handle = tokio::spawn(watcher.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_shutdown = shutdown_tx.subscribe();
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state, api_shutdown).await {
            error!(error = %e, "API server failed");
        }
    });

    let controller_handle = tokio::spawn(controller.run(outputs));

    let reason = shutdown_signal().await;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = watcher_handle.await {
        error!(error = %e, "Watcher task failed");
    }
    if let Err(e) = controller_handle.await {
        error!(error = %e, "Controller task failed");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT received",
        _ = terminate => "SIGTERM received",
    }
}
