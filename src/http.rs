// HTTP server for status and Prometheus metrics endpoints
//
// Listens on /health, /status and /metrics (default: 0.0.0.0:9090).
// /status surfaces the shared daily budget so the front end can warn users
// before the service starts rejecting; /metrics is scraped by Prometheus.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics;
use crate::quota::Gatekeeper;
use crate::session::SessionRegistry;

/// Shared state behind the status endpoints
#[derive(Clone)]
pub struct StatusState {
    /// Admission engine to report on
    pub gatekeeper: Arc<Gatekeeper>,
    /// Session registry to report on
    pub registry: Arc<SessionRegistry>,
}

/// Build the status router.
///
/// Returned as a plain `Router` so it can either be served standalone via
/// [`start_status_server`] or merged into a larger application router.
pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the status HTTP server
///
/// # Arguments
/// * `state` - engine and registry to report on
/// * `port` - Port to listen on (default 9090)
pub async fn start_status_server(state: StatusState, port: u16) -> Result<()> {
    // Initialize metrics
    metrics::init().context("Failed to initialize metrics")?;

    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting status server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind status server")?;

    axum::serve(listener, app)
        .await
        .context("Status server error")?;

    Ok(())
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Quota status endpoint
async fn status_handler(State(state): State<StatusState>) -> Json<serde_json::Value> {
    let global = state.gatekeeper.global_status();
    let active_sessions = state.registry.active_sessions().await;
    let tracked_identities = state.gatekeeper.tracked_entries().await;

    Json(json!({
        "rate_limit": global,
        "active_sessions": active_sessions,
        "tracked_identities": tracked_identities,
    }))
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}
