//! Finding lifecycle: reconciliation of scan results, suppression, orphan
//! cleanup and direct CRUD. Every mutation invalidates the stats cache for the
//! content items it touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::engine::IdentityMatcher;
use crate::errors::AppError;
use crate::models::finding::{
    CreateFinding, Finding, FindingFilters, SuppressionRequest, UpdateFinding, ViolationInput,
};
use crate::models::pagination::{PagedResult, Pagination};
use crate::services::aggregation::StatsCache;
use crate::services::fingerprint;
use crate::store::{
    bounded, FindingStore, KeyedViolation, NewFinding, ReconcileBatch, ReconcileOutcome,
    SuppressionChange, SuppressionOutcome,
};

pub struct Lifecycle {
    store: Arc<dyn FindingStore>,
    matcher: Arc<dyn IdentityMatcher>,
    stats: Arc<StatsCache>,
    store_timeout: Duration,
}

impl Lifecycle {
    pub fn new(
        store: Arc<dyn FindingStore>,
        matcher: Arc<dyn IdentityMatcher>,
        stats: Arc<StatsCache>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            matcher,
            stats,
            store_timeout,
        }
    }

    /// Attach snapshot keys computed through the identity matcher.
    pub fn key_violations(&self, violations: Vec<ViolationInput>) -> Vec<KeyedViolation> {
        violations
            .into_iter()
            .map(|v| KeyedViolation {
                snapshot_key: fingerprint::compute(self.matcher.as_ref(), &v.snapshot),
                rule_id: v.rule_id,
                severity: v.severity,
                snapshot: v.snapshot,
            })
            .collect()
    }

    /// Replace the live finding set of a content item with a scan result.
    pub async fn reconcile(
        &self,
        content_id: i64,
        site_id: i64,
        violations: Vec<ViolationInput>,
        acted_by: Option<i64>,
    ) -> Result<ReconcileOutcome, AppError> {
        let batch = ReconcileBatch {
            content_id,
            site_id,
            violations: self.key_violations(violations),
            acted_by,
        };
        let proposed = batch.violations.len();

        let outcome = bounded(self.store_timeout, self.store.reconcile(batch)).await?;
        self.stats.invalidate(content_id).await;

        tracing::info!(
            content_id,
            proposed,
            inserted = outcome.inserted.len(),
            refreshed = outcome.refreshed,
            stale = outcome.stale,
            content_found = outcome.content_found,
            "Reconciled scan result"
        );
        Ok(outcome)
    }

    pub async fn set_suppressed(
        &self,
        finding_id: Uuid,
        request: SuppressionRequest,
        user_id: i64,
    ) -> Result<SuppressionOutcome, AppError> {
        let change = SuppressionChange {
            finding_id,
            suppressed: request.suppressed,
            global: request.global,
            user_id,
            comment: request.comment,
            at: Utc::now(),
        };
        let global = change.global;

        let outcome = bounded(self.store_timeout, self.store.set_suppressed(change))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Finding {finding_id} not found")))?;

        if global {
            self.stats.clear().await;
        } else {
            self.stats.invalidate_many(&outcome.content_ids).await;
        }

        tracing::info!(
            finding_id = %finding_id,
            suppressed = request.suppressed,
            global,
            affected = outcome.affected,
            user_id,
            "Suppression changed"
        );
        Ok(outcome)
    }

    /// Clear suppression on a content item's findings when `flush` is set;
    /// either way the cached stats for the item are dropped.
    pub async fn clear_suppressions(&self, content_id: i64, flush: bool) -> Result<u64, AppError> {
        let cleared = if flush {
            bounded(self.store_timeout, self.store.clear_suppressions(content_id)).await?
        } else {
            0
        };
        self.stats.invalidate(content_id).await;
        tracing::info!(content_id, flush, cleared, "Suppressions cleared");
        Ok(cleared)
    }

    /// Delete findings of content items that no longer exist, in paced
    /// batches. Returns the content ids processed.
    pub async fn cleanup_orphans(
        &self,
        batch_size: usize,
        delay: Duration,
    ) -> Result<Vec<i64>, AppError> {
        let orphans = bounded(self.store_timeout, self.store.orphaned_content_ids()).await?;
        if orphans.is_empty() {
            tracing::debug!("No orphaned findings");
            return Ok(orphans);
        }

        let batches: Vec<&[i64]> = orphans.chunks(batch_size.max(1)).collect();
        let last = batches.len() - 1;
        for (i, batch) in batches.into_iter().enumerate() {
            let deleted =
                bounded(self.store_timeout, self.store.delete_findings_for(batch)).await?;
            self.stats.invalidate_many(batch).await;
            tracing::info!(batch = i, content_ids = ?batch, deleted, "Removed orphaned findings");
            if i < last && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(orphans)
    }

    /// Re-key stored findings for renamed rules.
    pub async fn migrate_rule_ids(&self, migrations: &[(String, String)]) -> Result<u64, AppError> {
        let mut total = 0;
        for (old, new) in migrations {
            let renamed = bounded(self.store_timeout, self.store.rename_rule(old, new)).await?;
            tracing::info!(old = %old, new = %new, renamed, "Migrated rule id");
            total += renamed;
        }
        if total > 0 {
            self.stats.clear().await;
        }
        Ok(total)
    }

    pub async fn create_finding(
        &self,
        input: CreateFinding,
        default_site_id: i64,
        created_by: i64,
    ) -> Result<Finding, AppError> {
        let content_id = input.content_id;
        let new = NewFinding {
            snapshot_key: fingerprint::compute(self.matcher.as_ref(), &input.snapshot),
            content_id,
            site_id: input.site_id.unwrap_or(default_site_id),
            content_type: input.content_type,
            rule_id: input.rule_id,
            severity: input.severity,
            snapshot: input.snapshot,
            created_by: Some(created_by),
        };

        let finding = bounded(self.store_timeout, self.store.insert_finding(new)).await?;
        self.stats.invalidate(content_id).await;
        tracing::info!(finding_id = %finding.id, content_id, rule_id = %finding.rule_id, "Finding created");
        Ok(finding)
    }

    pub async fn get_finding(&self, id: Uuid) -> Result<Finding, AppError> {
        bounded(self.store_timeout, self.store.get_finding(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Finding {id} not found")))
    }

    pub async fn list_findings(
        &self,
        filters: &FindingFilters,
        pagination: &Pagination,
    ) -> Result<PagedResult<Finding>, AppError> {
        bounded(self.store_timeout, self.store.list_findings(filters, pagination)).await
    }

    pub async fn count_findings(&self, filters: &FindingFilters) -> Result<i64, AppError> {
        bounded(self.store_timeout, self.store.count_findings(filters)).await
    }

    pub async fn update_finding(&self, id: Uuid, update: &UpdateFinding) -> Result<Finding, AppError> {
        let finding = bounded(self.store_timeout, self.store.update_finding(id, update))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Finding {id} not found")))?;
        self.stats.invalidate(finding.content_id).await;
        tracing::info!(finding_id = %id, "Finding updated");
        Ok(finding)
    }

    pub async fn delete_finding(&self, id: Uuid) -> Result<Finding, AppError> {
        let finding = bounded(self.store_timeout, self.store.delete_finding(id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Finding {id} not found")))?;
        self.stats.invalidate(finding.content_id).await;
        tracing::info!(finding_id = %id, content_id = finding.content_id, "Finding deleted");
        Ok(finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NormalizedMarkupMatcher;
    use crate::models::content::UpsertContent;
    use crate::models::finding::SeverityClass;
    use crate::store::{ContentRepository, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        lifecycle: Lifecycle,
    }

    async fn fixture(content_ids: &[i64]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for id in content_ids {
            store
                .upsert_content(
                    *id,
                    1,
                    &UpsertContent {
                        site_id: None,
                        content_type: "post".to_string(),
                        author_id: 3,
                        title: format!("Item {id}"),
                        body: String::new(),
                        scan_on_save: false,
                    },
                )
                .await
                .unwrap();
        }
        let lifecycle = Lifecycle::new(
            store.clone(),
            Arc::new(NormalizedMarkupMatcher::new().unwrap()),
            Arc::new(StatsCache::new()),
            Duration::from_secs(5),
        );
        Fixture { store, lifecycle }
    }

    fn violation(rule_id: &str, snapshot: &str) -> ViolationInput {
        ViolationInput {
            rule_id: rule_id.to_string(),
            severity: SeverityClass::Error,
            snapshot: snapshot.to_string(),
        }
    }

    #[tokio::test]
    async fn equivalent_snapshots_reconcile_to_one_finding() {
        let f = fixture(&[42]).await;
        f.lifecycle
            .reconcile(42, 1, vec![violation("img_alt_missing", "<img src=\"a.png\">")], None)
            .await
            .unwrap();
        let second = f
            .lifecycle
            .reconcile(42, 1, vec![violation("img_alt_missing", "<img  src='a.png' >")], None)
            .await
            .unwrap();

        assert!(second.inserted.is_empty());
        assert_eq!(second.refreshed, 1);
    }

    #[tokio::test]
    async fn suppression_survives_disappearance_and_return() {
        let f = fixture(&[42]).await;
        let v = violation("empty_link", "<a href=\"/x\"></a>");
        let first = f.lifecycle.reconcile(42, 1, vec![v.clone()], None).await.unwrap();
        let id = first.inserted[0];

        f.lifecycle
            .set_suppressed(
                id,
                SuppressionRequest {
                    suppressed: true,
                    global: false,
                    comment: Some("decorative".to_string()),
                },
                9,
            )
            .await
            .unwrap();

        f.lifecycle.reconcile(42, 1, vec![], None).await.unwrap();
        f.lifecycle.reconcile(42, 1, vec![v], None).await.unwrap();

        let finding = f.lifecycle.get_finding(id).await.unwrap();
        assert!(finding.suppression.suppressed);
        assert_eq!(finding.suppression.suppressed_by, Some(9));
        assert!(!finding.is_stale);
    }

    #[tokio::test]
    async fn global_suppression_spans_site_and_is_inherited() {
        let f = fixture(&[1, 2, 3]).await;
        let a = f
            .lifecycle
            .reconcile(1, 1, vec![violation("link_blank", "<a target=\"_blank\">A</a>")], None)
            .await
            .unwrap();
        f.lifecycle
            .reconcile(2, 1, vec![violation("link_blank", "<a target=\"_blank\">B</a>")], None)
            .await
            .unwrap();

        let outcome = f
            .lifecycle
            .set_suppressed(
                a.inserted[0],
                SuppressionRequest {
                    suppressed: true,
                    global: true,
                    comment: None,
                },
                4,
            )
            .await
            .unwrap();
        assert_eq!(outcome.affected, 2);
        assert_eq!(outcome.content_ids, vec![1, 2]);

        let c = f
            .lifecycle
            .reconcile(3, 1, vec![violation("link_blank", "<a target=\"_blank\">C</a>")], None)
            .await
            .unwrap();
        let inherited = f.lifecycle.get_finding(c.inserted[0]).await.unwrap();
        assert!(inherited.suppression.suppressed);
        assert!(inherited.suppression.global);
        assert_eq!(inherited.suppression.suppressed_by, Some(4));
    }

    #[tokio::test]
    async fn global_suppression_leaves_local_decisions_alone() {
        let f = fixture(&[1, 2]).await;
        let a = f
            .lifecycle
            .reconcile(1, 1, vec![violation("link_blank", "<a target=\"_blank\">A</a>")], None)
            .await
            .unwrap()
            .inserted[0];
        let b = f
            .lifecycle
            .reconcile(2, 1, vec![violation("link_blank", "<a target=\"_blank\">B</a>")], None)
            .await
            .unwrap()
            .inserted[0];

        f.lifecycle
            .set_suppressed(
                a,
                SuppressionRequest {
                    suppressed: true,
                    global: false,
                    comment: Some("decorative link".to_string()),
                },
                7,
            )
            .await
            .unwrap();

        let suppress = f
            .lifecycle
            .set_suppressed(
                b,
                SuppressionRequest {
                    suppressed: true,
                    global: true,
                    comment: None,
                },
                9,
            )
            .await
            .unwrap();
        assert_eq!(suppress.affected, 1);

        let local = f.lifecycle.get_finding(a).await.unwrap();
        assert!(local.suppression.suppressed);
        assert!(!local.suppression.global);
        assert_eq!(local.suppression.suppressed_by, Some(7));
        assert_eq!(local.suppression.comment.as_deref(), Some("decorative link"));

        f.lifecycle
            .set_suppressed(
                b,
                SuppressionRequest {
                    suppressed: false,
                    global: true,
                    comment: None,
                },
                9,
            )
            .await
            .unwrap();

        let local = f.lifecycle.get_finding(a).await.unwrap();
        assert!(local.suppression.suppressed);
        assert_eq!(local.suppression.suppressed_by, Some(7));
        assert!(!f.lifecycle.get_finding(b).await.unwrap().suppression.suppressed);
    }

    #[tokio::test]
    async fn orphan_cleanup_runs_once() {
        let f = fixture(&[10, 11, 12]).await;
        for id in [10, 11, 12] {
            f.lifecycle
                .reconcile(id, 1, vec![violation("empty_button", "<button></button>")], None)
                .await
                .unwrap();
        }
        f.store.delete_content(10).await.unwrap();
        f.store.delete_content(12).await.unwrap();

        let processed = f
            .lifecycle
            .cleanup_orphans(1, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(processed, vec![10, 12]);
        assert_eq!(f.lifecycle.count_findings(&FindingFilters::default()).await.unwrap(), 1);

        let again = f.lifecycle.cleanup_orphans(1, Duration::ZERO).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn slow_store_surfaces_as_unavailable() {
        let store = Arc::new(MemoryStore::new());
        store.set_delay(Duration::from_millis(200));
        let lifecycle = Lifecycle::new(
            store,
            Arc::new(NormalizedMarkupMatcher::new().unwrap()),
            Arc::new(StatsCache::new()),
            Duration::from_millis(20),
        );
        let err = lifecycle.reconcile(1, 1, vec![], None).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn duplicate_manual_finding_conflicts() {
        let f = fixture(&[42]).await;
        let input = CreateFinding {
            content_id: 42,
            site_id: None,
            content_type: "post".to_string(),
            rule_id: "empty_heading_tag".to_string(),
            severity: SeverityClass::Error,
            snapshot: "<h2></h2>".to_string(),
        };
        f.lifecycle.create_finding(input.clone(), 1, 2).await.unwrap();
        let err = f.lifecycle.create_finding(input, 1, 2).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
