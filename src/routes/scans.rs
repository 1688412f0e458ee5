//! Sandbox message endpoint.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json,
};

use crate::coordinator::{InboundMessage, OutboundMessage};
use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::routes::content::authorize_content;
use crate::AppState;

/// POST /api/v1/scan/messages — `{ sender, message }` from the scan sandbox.
///
/// Only requests whose `Origin` equals the trusted origin are acted on.
pub async fn post_message(
    State(state): State<AppState>,
    current_user: CurrentUser,
    headers: HeaderMap,
    Json(message): Json<InboundMessage>,
) -> Result<Json<ApiResponse<OutboundMessage>>, AppError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if origin != state.coordinator.settings().trusted_origin {
        tracing::warn!(origin, user_id = current_user.id, "Rejected sandbox message");
        return Err(AppError::Forbidden("Untrusted message origin".to_string()));
    }

    match message.content_id() {
        Some(content_id) => authorize_content(&state, &current_user, content_id).await?,
        None if current_user.role.edits_others_content() => {}
        None => {
            return Err(AppError::Forbidden(
                "Scheduled scans require editor or administrator".to_string(),
            ))
        }
    }

    let reply = state
        .coordinator
        .handle_message(origin, message, Some(current_user.id))
        .await?;
    Ok(ApiResponse::success(reply))
}
