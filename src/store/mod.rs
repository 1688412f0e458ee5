//! Persistence seams for findings and mirrored content.
//!
//! [`PgStore`](postgres::PgStore) is the production backend;
//! [`MemoryStore`](memory::MemoryStore) backs tests, local runs, and the seed
//! binary. Both honour the same transactional contract for `reconcile`.

pub mod memory;
pub mod postgres;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::content::{ContentItem, UpsertContent};
use crate::models::finding::{Finding, FindingFilters, SeverityClass, UpdateFinding};
use crate::models::pagination::{PagedResult, Pagination};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A violation with its identity key already computed.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedViolation {
    pub rule_id: String,
    pub severity: SeverityClass,
    pub snapshot: String,
    pub snapshot_key: String,
}

/// One scan's worth of violations for a single content item.
#[derive(Debug, Clone)]
pub struct ReconcileBatch {
    pub content_id: i64,
    pub site_id: i64,
    pub violations: Vec<KeyedViolation>,
    pub acted_by: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    pub content_id: i64,
    /// False when the content item was gone and nothing was written.
    pub content_found: bool,
    pub inserted: Vec<Uuid>,
    pub refreshed: u64,
    /// Findings left stale after this pass.
    pub stale: u64,
}

impl ReconcileOutcome {
    pub fn missing_content(content_id: i64) -> Self {
        Self {
            content_id,
            ..Default::default()
        }
    }
}

/// Fully resolved finding row ready for insertion.
#[derive(Debug, Clone)]
pub struct NewFinding {
    pub content_id: i64,
    pub site_id: i64,
    pub content_type: String,
    pub rule_id: String,
    pub severity: SeverityClass,
    pub snapshot: String,
    pub snapshot_key: String,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SuppressionChange {
    pub finding_id: Uuid,
    pub suppressed: bool,
    /// Apply to every finding of the same rule within the same site.
    pub global: bool,
    pub user_id: i64,
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuppressionOutcome {
    pub finding: Finding,
    pub affected: u64,
    /// Content items whose findings changed.
    pub content_ids: Vec<i64>,
}

#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_tag(&self) -> &'static str;

    async fn ping(&self) -> Result<(), AppError>;

    /// Apply a scan result atomically: stale everything unsuppressed, then
    /// upsert the batch by uniqueness key. A missing content item is a no-op.
    async fn reconcile(&self, batch: ReconcileBatch) -> Result<ReconcileOutcome, AppError>;

    async fn get_finding(&self, id: Uuid) -> Result<Option<Finding>, AppError>;

    /// Every finding of one content item, unpaged.
    async fn findings_for(&self, content_id: i64) -> Result<Vec<Finding>, AppError>;

    async fn list_findings(
        &self,
        filters: &FindingFilters,
        pagination: &Pagination,
    ) -> Result<PagedResult<Finding>, AppError>;

    async fn count_findings(&self, filters: &FindingFilters) -> Result<i64, AppError>;

    /// Fails with `Conflict` when the uniqueness key is taken.
    async fn insert_finding(&self, finding: NewFinding) -> Result<Finding, AppError>;

    async fn update_finding(
        &self,
        id: Uuid,
        update: &UpdateFinding,
    ) -> Result<Option<Finding>, AppError>;

    /// Returns the removed row.
    async fn delete_finding(&self, id: Uuid) -> Result<Option<Finding>, AppError>;

    async fn set_suppressed(
        &self,
        change: SuppressionChange,
    ) -> Result<Option<SuppressionOutcome>, AppError>;

    /// Clear suppression on every finding of a content item.
    async fn clear_suppressions(&self, content_id: i64) -> Result<u64, AppError>;

    /// Distinct content ids referenced by findings whose content item is gone.
    async fn orphaned_content_ids(&self) -> Result<Vec<i64>, AppError>;

    async fn delete_findings_for(&self, content_ids: &[i64]) -> Result<u64, AppError>;

    /// Re-key findings from `old` to `new`, dropping rows that would collide.
    async fn rename_rule(&self, old: &str, new: &str) -> Result<u64, AppError>;
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn get_content(&self, id: i64) -> Result<Option<ContentItem>, AppError>;

    async fn upsert_content(
        &self,
        id: i64,
        site_id: i64,
        input: &UpsertContent,
    ) -> Result<ContentItem, AppError>;

    async fn delete_content(&self, id: i64) -> Result<bool, AppError>;

    /// Flag an item for the scheduler. False when the item does not exist.
    async fn queue_scan(&self, id: i64) -> Result<bool, AppError>;

    /// Oldest queued items first.
    async fn queued_content(&self, limit: i64) -> Result<Vec<ContentItem>, AppError>;

    /// Clear the queue flag and stamp the scan time.
    async fn mark_scanned(&self, id: i64) -> Result<(), AppError>;
}

/// Run a store call under a deadline; expiry is reported as `Unavailable`.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Unavailable(format!(
            "Store did not respond within {}ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let value = bounded(Duration::from_secs(1), async { Ok::<_, AppError>(7) }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn bounded_times_out_as_unavailable() {
        let result: Result<(), AppError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
        assert!(err.is_retryable());
    }
}
