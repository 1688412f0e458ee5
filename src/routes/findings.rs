//! Finding routes: listing, counting, CRUD, suppression and live location.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::engine::{Document, MatchStatus};
use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::middleware::rbac::RequireEditor;
use crate::models::finding::{
    CreateFinding, Finding, FindingFilters, SuppressionRequest, UpdateFinding,
};
use crate::models::pagination::Pagination;
use crate::routes::content::authorize_content;
use crate::store::{bounded, SuppressionOutcome};
use crate::AppState;

/// GET /api/v1/findings — list findings; totals are returned in headers.
pub async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(pagination): Query<Pagination>,
    Query(filters): Query<FindingFilters>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.lifecycle.list_findings(&filters, &pagination).await?;
    let headers = [
        ("X-Total-Count", page.total.to_string()),
        ("X-Total-Pages", page.total_pages.to_string()),
    ];
    Ok((headers, ApiResponse::success(page.items)))
}

#[derive(Debug, Serialize)]
pub struct FindingCount {
    pub count: i64,
}

/// GET /api/v1/findings/count — number of findings matching the filters.
pub async fn count(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(filters): Query<FindingFilters>,
) -> Result<Json<ApiResponse<FindingCount>>, AppError> {
    let count = state.lifecycle.count_findings(&filters).await?;
    Ok(ApiResponse::success(FindingCount { count }))
}

/// POST /api/v1/findings — record a finding by hand (editor+).
pub async fn create(
    State(state): State<AppState>,
    RequireEditor(editor): RequireEditor,
    Json(body): Json<CreateFinding>,
) -> Result<Json<ApiResponse<Finding>>, AppError> {
    body.validate()?;
    let finding = state
        .lifecycle
        .create_finding(body, state.config.site_id, editor.id)
        .await?;
    Ok(ApiResponse::success(finding))
}

/// GET /api/v1/findings/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Finding>>, AppError> {
    let finding = state.lifecycle.get_finding(id).await?;
    Ok(ApiResponse::success(finding))
}

/// PUT /api/v1/findings/{id} — update mutable fields (editor+).
pub async fn update(
    State(state): State<AppState>,
    RequireEditor(_editor): RequireEditor,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateFinding>,
) -> Result<Json<ApiResponse<Finding>>, AppError> {
    if body.content_type.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::Validation("content_type must not be empty".to_string()));
    }
    let finding = state.lifecycle.update_finding(id, &body).await?;
    Ok(ApiResponse::success(finding))
}

/// DELETE /api/v1/findings/{id} — returns the removed finding (editor+).
pub async fn delete(
    State(state): State<AppState>,
    RequireEditor(_editor): RequireEditor,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Finding>>, AppError> {
    let finding = state.lifecycle.delete_finding(id).await?;
    Ok(ApiResponse::success(finding))
}

/// POST /api/v1/findings/{id}/suppression — suppress or unsuppress.
///
/// Local changes need edit permission on the finding's content item; global
/// changes span the whole site and need editor+.
pub async fn set_suppression(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SuppressionRequest>,
) -> Result<Json<ApiResponse<SuppressionOutcome>>, AppError> {
    body.validate()?;
    let finding = state.lifecycle.get_finding(id).await?;

    if body.global {
        if !current_user.role.edits_others_content() {
            return Err(AppError::Forbidden(
                "Global suppression requires editor or administrator".to_string(),
            ));
        }
    } else {
        authorize_content(&state, &current_user, finding.content_id).await?;
    }

    let outcome = state
        .lifecycle
        .set_suppressed(id, body, current_user.id)
        .await?;
    Ok(ApiResponse::success(outcome))
}

#[derive(Debug, Serialize)]
pub struct LocateResult {
    pub finding_id: Uuid,
    pub content_id: i64,
    #[serde(flatten)]
    pub status: MatchStatus,
}

/// GET /api/v1/findings/{id}/locate — find the flagged element in the
/// current body of its content item.
pub async fn locate(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LocateResult>>, AppError> {
    let finding = state.lifecycle.get_finding(id).await?;
    let item = bounded(
        state.config.store_timeout,
        state.content.get_content(finding.content_id),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Content {} not found", finding.content_id)))?;

    let matcher = state.matcher.clone();
    let snapshot = finding.snapshot;
    let status = tokio::task::spawn_blocking(move || {
        let document = Document::parse(&item.body);
        matcher.locate(&document, &snapshot).0
    })
    .await
    .map_err(|e| AppError::Internal(format!("Locate worker failed: {e}")))?;

    Ok(ApiResponse::success(LocateResult {
        finding_id: id,
        content_id: finding.content_id,
        status,
    }))
}
