//! Read-only status API over the registry and breaker bank.

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreakerBank};
use crate::config::AdminConfig;
use crate::error::{InterlinkError, Result};
use crate::metrics::MetricsService;
use crate::registry::{EndpointSnapshot, Registry};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of the status API
#[derive(Debug, Clone)]
pub struct AdminState {
    pub registry: Registry,
    pub breakers: CircuitBreakerBank,
    pub metrics: Option<MetricsService>,
}

#[derive(Debug, Serialize)]
struct LookupResponse {
    service: String,
    url: String,
}

/// Build the status API router
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/services", get(services_handler))
        .route("/services/:name", get(lookup_handler))
        .route("/breakers", get(breakers_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the status API until `shutdown` is cancelled
pub async fn serve(config: &AdminConfig, state: AdminState, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Status API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| InterlinkError::Internal(format!("Status API error: {}", e)))
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn services_handler(State(state): State<AdminState>) -> Json<Vec<EndpointSnapshot>> {
    Json(state.registry.snapshot())
}

async fn lookup_handler(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<LookupResponse>> {
    let url = state.registry.resolve(&name)?;
    Ok(Json(LookupResponse {
        service: name,
        url: url.to_string(),
    }))
}

async fn breakers_handler(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.breakers.snapshot().await)
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    match &state.metrics {
        Some(metrics) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}
