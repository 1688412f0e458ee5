//! Rule catalog listing.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::models::rule::Rule;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RuleListing {
    #[serde(flatten)]
    pub rule: Rule,
    /// Configured out of evaluation and summaries.
    pub excluded: bool,
}

/// GET /api/v1/rules — the resolved catalog, ordered by id.
pub async fn list(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ApiResponse<Vec<RuleListing>>>, AppError> {
    let excluded = &state.config.excluded_rules;
    let rules = state
        .catalog
        .all(&[])
        .into_iter()
        .map(|rule| RuleListing {
            excluded: excluded.contains(&rule.id),
            rule,
        })
        .collect();
    Ok(ApiResponse::success(rules))
}
