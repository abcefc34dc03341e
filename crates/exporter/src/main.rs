//! Occupancy Exporter - accelerator occupancy metrics for Kubernetes
//!
//! This binary runs as a single Deployment, periodically scanning nodes and
//! pods and exposing allocatable, capacity and allocated extended resources
//! to Prometheus.

use anyhow::Result;
use exporter_lib::{
    health::{components, HealthRegistry},
    inventory::KubeInventoryClient,
    observability::{ExporterMetrics, StructuredLogger},
    publisher::SnapshotPublisherBuilder,
    MetricsFacade, SnapshotStore,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::ExporterConfig::load()?;

    // Initialize tracing with JSON output; RUST_LOG overrides DEBUG
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    info!("Starting occupancy-exporter");

    let client =
        KubeInventoryClient::connect(config.kubeconfig_path.as_deref(), config.api_timeout)
            .await?;
    if let Err(e) = client.verify().await {
        error!(error = %e, "Kubernetes API server check failed");
        return Err(e);
    }

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::INVENTORY).await;
    health_registry.register(components::PUBLISHER).await;

    // Snapshot store, scrape facade and self-metrics share one registry
    let store = Arc::new(SnapshotStore::new());
    let facade = MetricsFacade::new(store.clone())?;
    let metrics = ExporterMetrics::register(facade.registry())?;

    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "occupancy-exporter".to_string());
    let logger = StructuredLogger::new(instance);
    logger.log_startup(
        EXPORTER_VERSION,
        config.port,
        &config.extended_resources,
        &config.monitored_namespaces,
        &config.node_label_for_model,
        config.interscan_pause,
    );

    let publisher = SnapshotPublisherBuilder::new()
        .client(Arc::new(client))
        .store(store)
        .interval(config.interscan_pause)
        .aggregation(config.aggregation())
        .metrics(metrics)
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let publisher_handle = tokio::spawn(publisher.run(shutdown_rx));

    // Start health, metrics and summary server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), facade));
    let mut api_handle = tokio::spawn(api::serve(config.port, app_state));

    let (reason, outcome) = tokio::select! {
        reason = shutdown_signal() => (reason, Ok(())),
        result = &mut api_handle => {
            let err = match result {
                Ok(Ok(())) => anyhow::anyhow!("API server exited"),
                Ok(Err(e)) => e.context("API server failed"),
                Err(e) => anyhow::anyhow!("API server task panicked: {e}"),
            };
            error!(error = %format!("{err:#}"), "API server stopped");
            health_registry
                .set_unhealthy(components::PUBLISHER, format!("{err:#}"))
                .await;
            ("API server stopped", Err(err))
        }
    };

    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());
    if let Err(e) = publisher_handle.await {
        error!(error = %e, "Scan loop task failed");
    }
    api_handle.abort();
    info!("Shutting down");

    outcome
}

/// Wait for Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
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
