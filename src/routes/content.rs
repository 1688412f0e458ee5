//! Content mirror routes and per-item scan actions.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::coordinator::{ScanResult, ScanTrigger};
use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::middleware::rbac::{require_content_edit, RequireAdmin, RequireEditor};
use crate::models::content::{ContentItem, UpsertContent};
use crate::models::finding::ViolationInput;
use crate::services::aggregation::AggregateStats;
use crate::store::{bounded, ReconcileOutcome};
use crate::AppState;

/// Check the user may edit `content_id`.
///
/// Editors and administrators may act on any id, including items not
/// mirrored yet; everyone else must be the item's author.
pub(crate) async fn authorize_content(
    state: &AppState,
    user: &CurrentUser,
    content_id: i64,
) -> Result<(), AppError> {
    if user.role.edits_others_content() {
        return Ok(());
    }
    let item = bounded(state.config.store_timeout, state.content.get_content(content_id))
        .await?
        .ok_or_else(|| {
            AppError::Forbidden(format!("No edit permission on content {content_id}"))
        })?;
    require_content_edit(user, &item)
}

#[derive(Debug, Serialize)]
pub struct ContentSaved {
    pub content: ContentItem,
    /// Present when an on-save scan ran.
    pub scan: Option<ScanResult>,
    pub queued: bool,
}

/// PUT /api/v1/content/{id} — mirror a saved content item (editor+).
pub async fn upsert(
    State(state): State<AppState>,
    RequireEditor(editor): RequireEditor,
    Path(id): Path<i64>,
    Json(body): Json<UpsertContent>,
) -> Result<Json<ApiResponse<ContentSaved>>, AppError> {
    body.validate()?;
    let site_id = body.site_id.unwrap_or(state.config.site_id);
    let content = bounded(
        state.config.store_timeout,
        state.content.upsert_content(id, site_id, &body),
    )
    .await?;
    state.stats.invalidate(id).await;
    tracing::info!(content_id = id, site_id, "Content mirrored");

    let mut saved = ContentSaved {
        content,
        scan: None,
        queued: false,
    };
    if body.scan_on_save {
        match state
            .coordinator
            .scan_content(id, ScanTrigger::Save, Some(editor.id))
            .await
        {
            Ok(result) => saved.scan = Some(result),
            Err(e) => {
                tracing::warn!(content_id = id, error = %e, "On-save scan failed, queueing");
                saved.queued =
                    bounded(state.config.store_timeout, state.content.queue_scan(id)).await?;
            }
        }
    }
    Ok(ApiResponse::success(saved))
}

#[derive(Debug, Serialize)]
pub struct ContentDeleted {
    pub id: i64,
    pub deleted: bool,
}

/// DELETE /api/v1/content/{id} — drop the mirror; findings become orphans (admin).
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ContentDeleted>>, AppError> {
    let deleted = bounded(state.config.store_timeout, state.content.delete_content(id)).await?;
    if !deleted {
        return Err(AppError::NotFound(format!("Content {id} not found")));
    }
    state.stats.invalidate(id).await;
    tracing::info!(content_id = id, "Content removed");
    Ok(ApiResponse::success(ContentDeleted { id, deleted }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitViolations {
    #[validate(nested)]
    pub violations: Vec<ViolationInput>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResult {
    pub success: bool,
    pub id: i64,
    pub outcome: ReconcileOutcome,
}

/// POST /api/v1/content/{id}/violations — replace the item's live findings
/// with a scan result collected elsewhere.
pub async fn submit_violations(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<SubmitViolations>,
) -> Result<Json<ApiResponse<SubmitResult>>, AppError> {
    body.validate()?;
    authorize_content(&state, &current_user, id).await?;

    let outcome = state
        .coordinator
        .save_results(id, body.violations, Some(current_user.id))
        .await?;
    Ok(ApiResponse::success(SubmitResult {
        success: true,
        id,
        outcome,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClearSuppressions {
    #[serde(default)]
    pub flush: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResult {
    pub success: bool,
    pub id: i64,
    pub flushed: bool,
    pub cleared: u64,
}

/// POST /api/v1/content/{id}/suppressions/clear
pub async fn clear_suppressions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
    Json(body): Json<ClearSuppressions>,
) -> Result<Json<ApiResponse<ClearResult>>, AppError> {
    authorize_content(&state, &current_user, id).await?;
    let cleared = state.lifecycle.clear_suppressions(id, body.flush).await?;
    Ok(ApiResponse::success(ClearResult {
        success: true,
        id,
        flushed: body.flush,
        cleared,
    }))
}

/// POST /api/v1/content/{id}/scan — scan the mirrored body now.
pub async fn scan(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ScanResult>>, AppError> {
    authorize_content(&state, &current_user, id).await?;
    let result = state
        .coordinator
        .scan_content(id, ScanTrigger::Manual, Some(current_user.id))
        .await?;
    Ok(ApiResponse::success(result))
}

#[derive(Debug, Serialize)]
pub struct Queued {
    pub id: i64,
    pub queued: bool,
}

/// POST /api/v1/content/{id}/queue — leave the item for the scheduler.
pub async fn queue(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Queued>>, AppError> {
    authorize_content(&state, &current_user, id).await?;
    let queued = bounded(state.config.store_timeout, state.content.queue_scan(id)).await?;
    if !queued {
        return Err(AppError::NotFound(format!("Content {id} not found")));
    }
    tracing::info!(content_id = id, "Scan queued");
    Ok(ApiResponse::success(Queued { id, queued }))
}

/// GET /api/v1/content/{id}/summary
pub async fn summary(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AggregateStats>>, AppError> {
    let stats = state.aggregator.summarize(id).await?;
    Ok(ApiResponse::success(stats))
}
