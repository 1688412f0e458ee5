//! Administrative maintenance actions.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::rbac::RequireAdmin;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct OrphanCleanup {
    pub content_ids: Vec<i64>,
    pub count: usize,
}

/// POST /api/v1/maintenance/orphans — delete findings of removed content (admin).
pub async fn cleanup_orphans(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> Result<Json<ApiResponse<OrphanCleanup>>, AppError> {
    tracing::info!(user_id = admin.id, "Orphan cleanup requested");
    let content_ids = state
        .lifecycle
        .cleanup_orphans(
            state.config.orphan_batch_size,
            state.config.orphan_batch_delay,
        )
        .await?;
    Ok(ApiResponse::success(OrphanCleanup {
        count: content_ids.len(),
        content_ids,
    }))
}
