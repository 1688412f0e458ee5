//! In-process backend with fault injection for tests.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::content::{ContentItem, UpsertContent};
use crate::models::finding::{Finding, FindingFilters, SeverityClass, Suppression, UpdateFinding};
use crate::models::pagination::{FindingOrderBy, PagedResult, Pagination, SortOrder};
use crate::store::{
    ContentRepository, FindingStore, NewFinding, ReconcileBatch, ReconcileOutcome,
    SuppressionChange, SuppressionOutcome,
};

#[derive(Debug, Clone, Default)]
struct Inner {
    findings: BTreeMap<Uuid, Finding>,
    content: BTreeMap<i64, ContentItem>,
    queued_at: HashMap<i64, DateTime<Utc>>,
}

impl Inner {
    fn find_by_key(
        &self,
        content_id: i64,
        site_id: i64,
        rule_id: &str,
        severity: SeverityClass,
        snapshot_key: &str,
    ) -> Option<Uuid> {
        self.findings
            .values()
            .find(|f| {
                f.content_id == content_id
                    && f.site_id == site_id
                    && f.rule_id == rule_id
                    && f.severity == severity
                    && f.snapshot_key == snapshot_key
            })
            .map(|f| f.id)
    }

    /// Most recent global suppression for a site+rule.
    fn global_suppression(&self, site_id: i64, rule_id: &str) -> Option<Suppression> {
        self.findings
            .values()
            .filter(|f| f.site_id == site_id && f.rule_id == rule_id && f.suppression.global)
            .max_by_key(|f| f.suppression.suppressed_at)
            .map(|f| f.suppression.clone())
    }
}

/// Store-wide mutex; every write works on a copy and swaps it in on success.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
    /// Fail `reconcile` after this many upserts (0 disables).
    fail_after_upserts: AtomicUsize,
    delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_reconcile_after(&self, upserts: usize) {
        self.fail_after_upserts.store(upserts, Ordering::SeqCst);
    }

    /// Delay every call, for exercising timeouts.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn guard(&self) -> Result<(), AppError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

fn compare(a: &Finding, b: &Finding, order_by: FindingOrderBy) -> CmpOrdering {
    match order_by {
        FindingOrderBy::Id => a.id.cmp(&b.id),
        FindingOrderBy::ContentId => a.content_id.cmp(&b.content_id),
        FindingOrderBy::RuleId => a.rule_id.cmp(&b.rule_id),
        FindingOrderBy::Severity => (a.severity as u8).cmp(&(b.severity as u8)),
        FindingOrderBy::CreatedAt => a.created_at.cmp(&b.created_at),
        FindingOrderBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    }
}

fn build_finding(new: NewFinding, inherited: Option<Suppression>, now: DateTime<Utc>) -> Finding {
    Finding {
        id: Uuid::now_v7(),
        content_id: new.content_id,
        site_id: new.site_id,
        content_type: new.content_type,
        rule_id: new.rule_id,
        severity: new.severity,
        snapshot: new.snapshot,
        snapshot_key: new.snapshot_key,
        is_stale: false,
        created_by: new.created_by,
        created_at: now,
        updated_at: now,
        suppression: inherited.unwrap_or_default(),
    }
}

#[async_trait]
impl FindingStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.guard().await
    }

    async fn reconcile(&self, batch: ReconcileBatch) -> Result<ReconcileOutcome, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;

        let Some(content_type) = inner
            .content
            .get(&batch.content_id)
            .map(|c| c.content_type.clone())
        else {
            tracing::info!(content_id = batch.content_id, "Content item gone, skipping reconcile");
            return Ok(ReconcileOutcome::missing_content(batch.content_id));
        };

        let mut next = inner.clone();
        let now = Utc::now();

        for finding in next.findings.values_mut() {
            if finding.content_id == batch.content_id
                && !finding.suppression.suppressed
                && !finding.is_stale
            {
                finding.is_stale = true;
                finding.updated_at = now;
            }
        }

        let mut outcome = ReconcileOutcome {
            content_id: batch.content_id,
            content_found: true,
            ..Default::default()
        };
        let fail_after = self.fail_after_upserts.load(Ordering::SeqCst);
        let mut seen = HashSet::new();

        for (upserts, violation) in batch.violations.into_iter().enumerate() {
            if fail_after > 0 && upserts >= fail_after {
                return Err(AppError::Unavailable(
                    "memory store dropped mid-reconcile".to_string(),
                ));
            }
            if !seen.insert((
                violation.rule_id.clone(),
                violation.severity,
                violation.snapshot_key.clone(),
            )) {
                continue;
            }

            let existing = next.find_by_key(
                batch.content_id,
                batch.site_id,
                &violation.rule_id,
                violation.severity,
                &violation.snapshot_key,
            );
            let current = match existing {
                Some(id) => next.findings.get_mut(&id),
                None => None,
            };
            match current {
                Some(finding) => {
                    finding.is_stale = false;
                    finding.updated_at = now;
                    outcome.refreshed += 1;
                }
                None => {
                    let inherited = next.global_suppression(batch.site_id, &violation.rule_id);
                    let finding = build_finding(
                        NewFinding {
                            content_id: batch.content_id,
                            site_id: batch.site_id,
                            content_type: content_type.clone(),
                            rule_id: violation.rule_id,
                            severity: violation.severity,
                            snapshot: violation.snapshot,
                            snapshot_key: violation.snapshot_key,
                            created_by: batch.acted_by,
                        },
                        inherited,
                        now,
                    );
                    outcome.inserted.push(finding.id);
                    next.findings.insert(finding.id, finding);
                }
            }
        }

        outcome.stale = next
            .findings
            .values()
            .filter(|f| f.content_id == batch.content_id && f.is_stale)
            .count() as u64;

        *inner = next;
        Ok(outcome)
    }

    async fn get_finding(&self, id: Uuid) -> Result<Option<Finding>, AppError> {
        self.guard().await?;
        Ok(self.inner.lock().await.findings.get(&id).cloned())
    }

    async fn findings_for(&self, content_id: i64) -> Result<Vec<Finding>, AppError> {
        self.guard().await?;
        let inner = self.inner.lock().await;
        let mut findings: Vec<Finding> = inner
            .findings
            .values()
            .filter(|f| f.content_id == content_id)
            .cloned()
            .collect();
        findings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(findings)
    }

    async fn list_findings(
        &self,
        filters: &FindingFilters,
        pagination: &Pagination,
    ) -> Result<PagedResult<Finding>, AppError> {
        self.guard().await?;
        let inner = self.inner.lock().await;

        let mut matching: Vec<Finding> = inner
            .findings
            .values()
            .filter(|f| filters.matches(f))
            .cloned()
            .collect();
        let order_by = pagination.order_by();
        let descending = pagination.sort_order() == SortOrder::Desc;
        matching.sort_by(|a, b| {
            let primary = compare(a, b, order_by);
            let primary = if descending { primary.reverse() } else { primary };
            primary.then_with(|| a.id.cmp(&b.id))
        });

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(pagination.offset().max(0) as usize)
            .take(pagination.limit() as usize)
            .collect();
        Ok(PagedResult::new(items, total, pagination))
    }

    async fn count_findings(&self, filters: &FindingFilters) -> Result<i64, AppError> {
        self.guard().await?;
        let inner = self.inner.lock().await;
        Ok(inner.findings.values().filter(|f| filters.matches(f)).count() as i64)
    }

    async fn insert_finding(&self, finding: NewFinding) -> Result<Finding, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;

        if inner
            .find_by_key(
                finding.content_id,
                finding.site_id,
                &finding.rule_id,
                finding.severity,
                &finding.snapshot_key,
            )
            .is_some()
        {
            return Err(AppError::Conflict(
                "Finding already exists for this element".to_string(),
            ));
        }

        let inherited = inner.global_suppression(finding.site_id, &finding.rule_id);
        let created = build_finding(finding, inherited, Utc::now());
        inner.findings.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_finding(
        &self,
        id: Uuid,
        update: &UpdateFinding,
    ) -> Result<Option<Finding>, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;

        let Some(current) = inner.findings.get(&id).cloned() else {
            return Ok(None);
        };
        let severity = update.severity.unwrap_or(current.severity);
        if severity != current.severity {
            let clash = inner.find_by_key(
                current.content_id,
                current.site_id,
                &current.rule_id,
                severity,
                &current.snapshot_key,
            );
            if clash.is_some() {
                return Err(AppError::Conflict(
                    "Finding already exists for this element".to_string(),
                ));
            }
        }

        let finding = inner.findings.get_mut(&id).map(|f| {
            f.severity = severity;
            if let Some(ref content_type) = update.content_type {
                f.content_type = content_type.clone();
            }
            if let Some(stale) = update.is_stale {
                f.is_stale = stale;
            }
            f.updated_at = Utc::now();
            f.clone()
        });
        Ok(finding)
    }

    async fn delete_finding(&self, id: Uuid) -> Result<Option<Finding>, AppError> {
        self.guard().await?;
        Ok(self.inner.lock().await.findings.remove(&id))
    }

    async fn set_suppressed(
        &self,
        change: SuppressionChange,
    ) -> Result<Option<SuppressionOutcome>, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;

        let Some(target) = inner.findings.get(&change.finding_id).cloned() else {
            return Ok(None);
        };

        let stamp = Suppression {
            suppressed: change.suppressed,
            global: change.global && change.suppressed,
            suppressed_by: Some(change.user_id),
            suppressed_at: Some(change.at),
            comment: change.comment.clone(),
        };

        let mut content_ids = Vec::new();
        for finding in inner.findings.values_mut() {
            let selected = if change.global {
                finding.site_id == target.site_id
                    && finding.rule_id == target.rule_id
                    && (finding.id == target.id
                        || if change.suppressed {
                            !finding.suppression.suppressed
                        } else {
                            finding.suppression.global
                        })
            } else {
                finding.id == target.id
            };
            if selected {
                finding.suppression = stamp.clone();
                finding.updated_at = change.at;
                content_ids.push(finding.content_id);
            }
        }

        let affected = content_ids.len() as u64;
        let content_ids: BTreeSet<i64> = content_ids.into_iter().collect();
        let finding = inner
            .findings
            .get(&change.finding_id)
            .cloned()
            .ok_or_else(|| AppError::Internal("finding vanished during suppression".to_string()))?;

        Ok(Some(SuppressionOutcome {
            finding,
            affected,
            content_ids: content_ids.into_iter().collect(),
        }))
    }

    async fn clear_suppressions(&self, content_id: i64) -> Result<u64, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut cleared = 0;
        for finding in inner.findings.values_mut() {
            if finding.content_id == content_id && finding.suppression.suppressed {
                finding.suppression = Suppression::default();
                finding.updated_at = now;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn orphaned_content_ids(&self) -> Result<Vec<i64>, AppError> {
        self.guard().await?;
        let inner = self.inner.lock().await;
        let ids: BTreeSet<i64> = inner
            .findings
            .values()
            .map(|f| f.content_id)
            .filter(|id| !inner.content.contains_key(id))
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn delete_findings_for(&self, content_ids: &[i64]) -> Result<u64, AppError> {
        self.guard().await?;
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let before = inner.findings.len();
        let content = &inner.content;
        inner.findings.retain(|_, f| {
            !content_ids.contains(&f.content_id) || content.contains_key(&f.content_id)
        });
        Ok((before - inner.findings.len()) as u64)
    }

    async fn rename_rule(&self, old: &str, new: &str) -> Result<u64, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;

        let taken: HashSet<(i64, i64, u8, String)> = inner
            .findings
            .values()
            .filter(|f| f.rule_id == new)
            .map(|f| (f.content_id, f.site_id, f.severity as u8, f.snapshot_key.clone()))
            .collect();

        inner.findings.retain(|_, f| {
            f.rule_id != old
                || !taken.contains(&(f.content_id, f.site_id, f.severity as u8, f.snapshot_key.clone()))
        });

        let now = Utc::now();
        let mut renamed = 0;
        for finding in inner.findings.values_mut().filter(|f| f.rule_id == old) {
            finding.rule_id = new.to_string();
            finding.updated_at = now;
            renamed += 1;
        }
        Ok(renamed)
    }
}

#[async_trait]
impl ContentRepository for MemoryStore {
    async fn get_content(&self, id: i64) -> Result<Option<ContentItem>, AppError> {
        self.guard().await?;
        Ok(self.inner.lock().await.content.get(&id).cloned())
    }

    async fn upsert_content(
        &self,
        id: i64,
        site_id: i64,
        input: &UpsertContent,
    ) -> Result<ContentItem, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let item = match inner.content.get(&id) {
            Some(existing) => ContentItem {
                site_id,
                content_type: input.content_type.clone(),
                author_id: input.author_id,
                title: input.title.clone(),
                body: input.body.clone(),
                updated_at: now,
                ..existing.clone()
            },
            None => ContentItem {
                id,
                site_id,
                content_type: input.content_type.clone(),
                author_id: input.author_id,
                title: input.title.clone(),
                body: input.body.clone(),
                scan_queued: false,
                last_scanned_at: None,
                created_at: now,
                updated_at: now,
            },
        };
        inner.content.insert(id, item.clone());
        Ok(item)
    }

    async fn delete_content(&self, id: i64) -> Result<bool, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;
        inner.queued_at.remove(&id);
        Ok(inner.content.remove(&id).is_some())
    }

    async fn queue_scan(&self, id: i64) -> Result<bool, AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;
        let Some(item) = inner.content.get_mut(&id) else {
            return Ok(false);
        };
        item.scan_queued = true;
        inner.queued_at.entry(id).or_insert_with(Utc::now);
        Ok(true)
    }

    async fn queued_content(&self, limit: i64) -> Result<Vec<ContentItem>, AppError> {
        self.guard().await?;
        let inner = self.inner.lock().await;
        let mut queued: Vec<&ContentItem> =
            inner.content.values().filter(|c| c.scan_queued).collect();
        queued.sort_by_key(|c| (inner.queued_at.get(&c.id).copied(), c.id));
        Ok(queued
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_scanned(&self, id: i64) -> Result<(), AppError> {
        self.guard().await?;
        let mut inner = self.inner.lock().await;
        inner.queued_at.remove(&id);
        if let Some(item) = inner.content.get_mut(&id) {
            item.scan_queued = false;
            item.last_scanned_at = Some(Utc::now());
        }
        Ok(())
    }
}
