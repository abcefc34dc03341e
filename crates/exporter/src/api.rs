//! HTTP API for health checks, Prometheus metrics and the accelerator summary

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use exporter_lib::{
    aggregator::summarize_models,
    health::{ComponentStatus, HealthRegistry},
    MetricsFacade, ModelSummary,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub facade: MetricsFacade,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, facade: MetricsFacade) -> Self {
        Self {
            health_registry,
            facade,
        }
    }
}

/// Per-model availability as of the current snapshot
#[derive(Debug, Serialize)]
struct AcceleratorsResponse {
    timestamp: DateTime<Utc>,
    models: Vec<ModelSummary>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        // Still serving the last good snapshot
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a snapshot is published
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.facade.render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Per-model accelerator summary, 503 before the first scan
async fn accelerators(State(state): State<Arc<AppState>>) -> Response {
    let view = state.facade.current_snapshot();
    let Some(snapshot) = view.snapshot() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "no_data" })),
        )
            .into_response();
    };

    let body = AcceleratorsResponse {
        timestamp: snapshot.timestamp,
        models: summarize_models(snapshot),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/accelerators", get(accelerators))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
