//! Role and ownership checks layered on [`CurrentUser`].

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::errors::AppError;
use crate::middleware::auth::CurrentUser;
use crate::models::content::ContentItem;
use crate::models::user::{self, UserRole};
use crate::AppState;

/// Extractor that requires the Administrator role.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != UserRole::Administrator {
            return Err(AppError::Forbidden(
                "Administrator access required".to_string(),
            ));
        }
        Ok(RequireAdmin(user))
    }
}

/// Extractor that requires a role able to edit other users' content.
#[derive(Debug, Clone)]
pub struct RequireEditor(pub CurrentUser);

impl FromRequestParts<AppState> for RequireEditor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.role.edits_others_content() {
            return Err(AppError::Forbidden(
                "Editor or administrator access required".to_string(),
            ));
        }
        Ok(RequireEditor(user))
    }
}

/// Fail with `Forbidden` unless the user may edit `item`.
pub fn require_content_edit(user: &CurrentUser, item: &ContentItem) -> Result<(), AppError> {
    if user::can_edit(user.id, user.role, item) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "No edit permission on content {}",
            item.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: i64, role: UserRole) -> CurrentUser {
        CurrentUser {
            id,
            username: format!("user{id}"),
            role,
        }
    }

    fn item(author_id: i64) -> ContentItem {
        let now = Utc::now();
        ContentItem {
            id: 42,
            site_id: 1,
            content_type: "post".to_string(),
            author_id,
            title: String::new(),
            body: String::new(),
            scan_queued: false,
            last_scanned_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn content_edit_follows_authorship() {
        assert!(require_content_edit(&user(5, UserRole::Author), &item(5)).is_ok());
        let err = require_content_edit(&user(5, UserRole::Author), &item(6)).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(require_content_edit(&user(5, UserRole::Editor), &item(6)).is_ok());
    }
}
