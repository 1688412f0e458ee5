//! Principal roles and the edit-permission rule over content items.

use serde::{Deserialize, Serialize};

use crate::models::content::ContentItem;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    Administrator,
    Editor,
    Author,
    Contributor,
    Subscriber,
}

impl UserRole {
    /// May act on any content item regardless of authorship.
    pub fn edits_others_content(&self) -> bool {
        matches!(self, Self::Administrator | Self::Editor)
    }

    /// May edit content they authored.
    pub fn edits_own_content(&self) -> bool {
        !matches!(self, Self::Subscriber)
    }
}

/// Whether a principal holds edit permission on a content item.
pub fn can_edit(user_id: i64, role: UserRole, item: &ContentItem) -> bool {
    role.edits_others_content() || (role.edits_own_content() && item.author_id == user_id)
}
