//! HTTP API for health checks, Prometheus metrics, stats and outcome reports

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use placement_core::{render_metrics, ComponentStatus, HealthRegistry, Orchestrator, Outcome};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub engine: Arc<Orchestrator>,
    pub outcomes: mpsc::Sender<Outcome>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        engine: Arc<Orchestrator>,
        outcomes: mpsc::Sender<Outcome>,
    ) -> Self {
        Self {
            health_registry,
            engine,
            outcomes,
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .health_registry
        .observe_stats(&state.engine.stats())
        .await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still placing
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
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
async fn metrics() -> impl IntoResponse {
    match render_metrics() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                e.to_string().into_bytes(),
            )
        }
    }
}

/// Engine stats snapshot
async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.stats())
}

/// Queue an outcome for the ordered outcome worker
async fn report_outcome(
    State(state): State<Arc<AppState>>,
    Json(outcome): Json<Outcome>,
) -> impl IntoResponse {
    let decision_id = outcome.decision_id;
    match state.outcomes.try_send(outcome) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "queued": true, "decision_id": decision_id })),
        ),
        Err(TrySendError::Full(_)) => {
            warn!(decision_id = %decision_id, "Outcome queue full");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "queued": false, "error": "outcome queue full" })),
            )
        }
        Err(TrySendError::Closed(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "queued": false, "error": "outcome worker stopped" })),
        ),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .route("/outcomes", post(report_outcome))
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
