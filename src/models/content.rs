//! Content items mirrored from the CMS for scanning and ownership checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContentItem {
    pub id: i64,
    pub site_id: i64,
    pub content_type: String,
    pub author_id: i64,
    pub title: String,
    /// Rendered markup of the item, as served to visitors.
    pub body: String,
    pub scan_queued: bool,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload sent by the CMS when an item is saved.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpsertContent {
    pub site_id: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub content_type: String,
    pub author_id: i64,
    #[validate(length(max = 1000))]
    pub title: String,
    pub body: String,
    /// Run a scan immediately after saving.
    #[serde(default)]
    pub scan_on_save: bool,
}
