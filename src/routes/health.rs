//! Health check endpoints for liveness and readiness probes.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::errors::ApiResponse;
use crate::AppState;

/// Readiness probe detail.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub store: String,
    pub backend: String,
    pub rules: usize,
}

/// Liveness probe — always returns OK if the process is running.
pub async fn live() -> &'static str {
    "OK"
}

/// Readiness probe — checks the findings store answers within the store timeout.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<HealthStatus>>) {
    let ping = tokio::time::timeout(state.config.store_timeout, state.store.ping()).await;
    let (code, store_status) = match ping {
        Ok(Ok(())) => (StatusCode::OK, "connected".to_string()),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Store health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, format!("error: {e}"))
        }
        Err(_) => {
            tracing::warn!("Store health check timed out");
            (StatusCode::SERVICE_UNAVAILABLE, "error: timed out".to_string())
        }
    };

    let status = if code == StatusCode::OK { "ok" } else { "degraded" };
    (
        code,
        ApiResponse::success(HealthStatus {
            status: status.to_string(),
            store: store_status,
            backend: state.store.backend_tag().to_string(),
            rules: state.catalog.len(),
        }),
    )
}
