//! PostgreSQL backend.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::content::{ContentItem, UpsertContent};
use crate::models::finding::{Finding, FindingFilters, UpdateFinding};
use crate::models::pagination::{PagedResult, Pagination};
use crate::store::{
    ContentRepository, FindingStore, NewFinding, ReconcileBatch, ReconcileOutcome,
    SuppressionChange, SuppressionOutcome,
};

/// Attribution copied from an existing global suppression.
#[derive(Debug, Clone, sqlx::FromRow)]
struct GlobalSuppression {
    rule_id: String,
    suppressed_by: Option<i64>,
    suppressed_at: Option<DateTime<Utc>>,
    suppression_comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> AppError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("{what} already exists for this element"))
        }
        _ => AppError::Database(e),
    }
}

async fn global_suppressions(
    tx: &mut Transaction<'_, Postgres>,
    site_id: i64,
) -> Result<HashMap<String, GlobalSuppression>, AppError> {
    let rows = sqlx::query_as::<_, GlobalSuppression>(
        "SELECT DISTINCT ON (rule_id) rule_id, suppressed_by, suppressed_at, suppression_comment \
         FROM findings WHERE site_id = $1 AND suppressed_globally \
         ORDER BY rule_id, suppressed_at DESC NULLS LAST",
    )
    .bind(site_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows.into_iter().map(|g| (g.rule_id.clone(), g)).collect())
}

#[async_trait]
impl FindingStore for PgStore {
    fn backend_tag(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn reconcile(&self, batch: ReconcileBatch) -> Result<ReconcileOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes reconciles of the same item.
        let content_type: Option<String> =
            sqlx::query_scalar("SELECT content_type FROM content_items WHERE id = $1 FOR UPDATE")
                .bind(batch.content_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(content_type) = content_type else {
            tx.rollback().await?;
            tracing::info!(content_id = batch.content_id, "Content item gone, skipping reconcile");
            return Ok(ReconcileOutcome::missing_content(batch.content_id));
        };

        sqlx::query(
            "UPDATE findings SET is_stale = TRUE, updated_at = NOW() \
             WHERE content_id = $1 AND NOT is_suppressed AND NOT is_stale",
        )
        .bind(batch.content_id)
        .execute(&mut *tx)
        .await?;

        let globals = global_suppressions(&mut tx, batch.site_id).await?;

        let mut outcome = ReconcileOutcome {
            content_id: batch.content_id,
            content_found: true,
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for violation in &batch.violations {
            if !seen.insert((&violation.rule_id, violation.severity, &violation.snapshot_key)) {
                continue;
            }
            let global = globals.get(&violation.rule_id);

            let (id, inserted): (Uuid, bool) = sqlx::query_as(
                "INSERT INTO findings \
                 (id, content_id, site_id, content_type, rule_id, severity, snapshot, snapshot_key, \
                  is_stale, created_by, is_suppressed, suppressed_globally, suppressed_by, \
                  suppressed_at, suppression_comment) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, $10, $10, $11, $12, $13) \
                 ON CONFLICT (content_id, site_id, rule_id, severity, snapshot_key) \
                 DO UPDATE SET is_stale = FALSE, updated_at = NOW() \
                 RETURNING id, (xmax = 0) AS inserted",
            )
            .bind(Uuid::now_v7())
            .bind(batch.content_id)
            .bind(batch.site_id)
            .bind(&content_type)
            .bind(&violation.rule_id)
            .bind(violation.severity)
            .bind(&violation.snapshot)
            .bind(&violation.snapshot_key)
            .bind(batch.acted_by)
            .bind(global.is_some())
            .bind(global.and_then(|g| g.suppressed_by))
            .bind(global.and_then(|g| g.suppressed_at))
            .bind(global.and_then(|g| g.suppression_comment.clone()))
            .fetch_one(&mut *tx)
            .await?;

            if inserted {
                outcome.inserted.push(id);
            } else {
                outcome.refreshed += 1;
            }
        }

        let stale: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM findings WHERE content_id = $1 AND is_stale",
        )
        .bind(batch.content_id)
        .fetch_one(&mut *tx)
        .await?;
        outcome.stale = stale.max(0) as u64;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_finding(&self, id: Uuid) -> Result<Option<Finding>, AppError> {
        let finding = sqlx::query_as::<_, Finding>("SELECT * FROM findings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(finding)
    }

    async fn findings_for(&self, content_id: i64) -> Result<Vec<Finding>, AppError> {
        let findings = sqlx::query_as::<_, Finding>(
            "SELECT * FROM findings WHERE content_id = $1 ORDER BY created_at, id",
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(findings)
    }

    async fn list_findings(
        &self,
        filters: &FindingFilters,
        pagination: &Pagination,
    ) -> Result<PagedResult<Finding>, AppError> {
        let where_clause = where_clause(filters);

        let count_sql = format!("SELECT COUNT(*) FROM findings {where_clause}");
        let data_sql = format!(
            "SELECT * FROM findings {where_clause} ORDER BY {} {}, id ASC LIMIT {} OFFSET {}",
            pagination.order_by().column(),
            pagination.sort_order().as_sql(),
            pagination.limit(),
            pagination.offset()
        );

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        let mut data_query = sqlx::query_as::<_, Finding>(&data_sql);

        macro_rules! bind_both {
            ($val:expr) => {
                count_query = count_query.bind($val);
                data_query = data_query.bind($val);
            };
        }

        if let Some(content_id) = filters.content_id {
            bind_both!(content_id);
        }
        if let Some(site_id) = filters.site_id {
            bind_both!(site_id);
        }
        if let Some(ref content_type) = filters.content_type {
            bind_both!(content_type);
        }
        if let Some(ref rule_id) = filters.rule_id {
            bind_both!(rule_id);
        }
        if let Some(severity) = filters.severity {
            bind_both!(severity);
        }
        if let Some(stale) = filters.stale {
            bind_both!(stale);
        }
        if let Some(suppressed) = filters.suppressed {
            bind_both!(suppressed);
        }

        let total = count_query.fetch_one(&self.pool).await?;
        let items = data_query.fetch_all(&self.pool).await?;

        Ok(PagedResult::new(items, total, pagination))
    }

    async fn count_findings(&self, filters: &FindingFilters) -> Result<i64, AppError> {
        let sql = format!("SELECT COUNT(*) FROM findings {}", where_clause(filters));
        let mut query = sqlx::query_scalar::<_, i64>(&sql);

        if let Some(content_id) = filters.content_id {
            query = query.bind(content_id);
        }
        if let Some(site_id) = filters.site_id {
            query = query.bind(site_id);
        }
        if let Some(ref content_type) = filters.content_type {
            query = query.bind(content_type);
        }
        if let Some(ref rule_id) = filters.rule_id {
            query = query.bind(rule_id);
        }
        if let Some(severity) = filters.severity {
            query = query.bind(severity);
        }
        if let Some(stale) = filters.stale {
            query = query.bind(stale);
        }
        if let Some(suppressed) = filters.suppressed {
            query = query.bind(suppressed);
        }

        Ok(query.fetch_one(&self.pool).await?)
    }

    async fn insert_finding(&self, finding: NewFinding) -> Result<Finding, AppError> {
        let mut tx = self.pool.begin().await?;
        let globals = global_suppressions(&mut tx, finding.site_id).await?;
        let global = globals.get(&finding.rule_id);

        let created = sqlx::query_as::<_, Finding>(
            "INSERT INTO findings \
             (id, content_id, site_id, content_type, rule_id, severity, snapshot, snapshot_key, \
              is_stale, created_by, is_suppressed, suppressed_globally, suppressed_by, \
              suppressed_at, suppression_comment) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, $10, $10, $11, $12, $13) \
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(finding.content_id)
        .bind(finding.site_id)
        .bind(&finding.content_type)
        .bind(&finding.rule_id)
        .bind(finding.severity)
        .bind(&finding.snapshot)
        .bind(&finding.snapshot_key)
        .bind(finding.created_by)
        .bind(global.is_some())
        .bind(global.and_then(|g| g.suppressed_by))
        .bind(global.and_then(|g| g.suppressed_at))
        .bind(global.and_then(|g| g.suppression_comment.clone()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "Finding"))?;

        tx.commit().await?;
        Ok(created)
    }

    async fn update_finding(
        &self,
        id: Uuid,
        update: &UpdateFinding,
    ) -> Result<Option<Finding>, AppError> {
        let finding = sqlx::query_as::<_, Finding>(
            "UPDATE findings SET \
             severity = COALESCE($2, severity), \
             content_type = COALESCE($3, content_type), \
             is_stale = COALESCE($4, is_stale), \
             updated_at = NOW() \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(update.severity)
        .bind(&update.content_type)
        .bind(update.is_stale)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Finding"))?;
        Ok(finding)
    }

    async fn delete_finding(&self, id: Uuid) -> Result<Option<Finding>, AppError> {
        let finding = sqlx::query_as::<_, Finding>("DELETE FROM findings WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(finding)
    }

    async fn set_suppressed(
        &self,
        change: SuppressionChange,
    ) -> Result<Option<SuppressionOutcome>, AppError> {
        let mut tx = self.pool.begin().await?;

        let target = sqlx::query_as::<_, Finding>("SELECT * FROM findings WHERE id = $1 FOR UPDATE")
            .bind(change.finding_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(target) = target else {
            tx.rollback().await?;
            return Ok(None);
        };

        let content_ids: Vec<i64> = if change.global {
            // Suppressing stamps unsuppressed site+rule rows; unsuppressing lifts
            // only global decisions. Local suppressions keep their own stamp.
            sqlx::query_scalar(
                "UPDATE findings SET is_suppressed = $1, suppressed_globally = $1, \
                 suppressed_by = $2, suppressed_at = $3, suppression_comment = $4, updated_at = NOW() \
                 WHERE site_id = $5 AND rule_id = $6 \
                 AND (id = $7 OR ($1 AND NOT is_suppressed) OR (NOT $1 AND suppressed_globally)) \
                 RETURNING content_id",
            )
            .bind(change.suppressed)
            .bind(change.user_id)
            .bind(change.at)
            .bind(&change.comment)
            .bind(target.site_id)
            .bind(&target.rule_id)
            .bind(target.id)
            .fetch_all(&mut *tx)
            .await?
        } else {
            sqlx::query_scalar(
                "UPDATE findings SET is_suppressed = $1, suppressed_globally = FALSE, \
                 suppressed_by = $2, suppressed_at = $3, suppression_comment = $4, updated_at = NOW() \
                 WHERE id = $5 RETURNING content_id",
            )
            .bind(change.suppressed)
            .bind(change.user_id)
            .bind(change.at)
            .bind(&change.comment)
            .bind(target.id)
            .fetch_all(&mut *tx)
            .await?
        };

        let finding = sqlx::query_as::<_, Finding>("SELECT * FROM findings WHERE id = $1")
            .bind(target.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        let affected = content_ids.len() as u64;
        let content_ids: BTreeSet<i64> = content_ids.into_iter().collect();
        Ok(Some(SuppressionOutcome {
            finding,
            affected,
            content_ids: content_ids.into_iter().collect(),
        }))
    }

    async fn clear_suppressions(&self, content_id: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE findings SET is_suppressed = FALSE, suppressed_globally = FALSE, \
             suppressed_by = NULL, suppressed_at = NULL, suppression_comment = NULL, updated_at = NOW() \
             WHERE content_id = $1 AND is_suppressed",
        )
        .bind(content_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn orphaned_content_ids(&self) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT f.content_id FROM findings f \
             LEFT JOIN content_items c ON c.id = f.content_id \
             WHERE c.id IS NULL ORDER BY f.content_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete_findings_for(&self, content_ids: &[i64]) -> Result<u64, AppError> {
        if content_ids.is_empty() {
            return Ok(0);
        }
        // Content re-mirrored since it was listed keeps its findings.
        let result = sqlx::query(
            "DELETE FROM findings f WHERE f.content_id = ANY($1) \
             AND NOT EXISTS (SELECT 1 FROM content_items c WHERE c.id = f.content_id)",
        )
        .bind(content_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn rename_rule(&self, old: &str, new: &str) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        let merged = sqlx::query(
            "DELETE FROM findings o USING findings n \
             WHERE o.rule_id = $1 AND n.rule_id = $2 \
               AND n.content_id = o.content_id AND n.site_id = o.site_id \
               AND n.severity = o.severity AND n.snapshot_key = o.snapshot_key",
        )
        .bind(old)
        .bind(new)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let renamed = sqlx::query(
            "UPDATE findings SET rule_id = $2, updated_at = NOW() WHERE rule_id = $1",
        )
        .bind(old)
        .bind(new)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        if merged > 0 {
            tracing::info!(old, new, merged, "Dropped findings already present under new rule id");
        }
        Ok(renamed)
    }
}

/// WHERE clause for the finding filters; bind order follows field order.
fn where_clause(filters: &FindingFilters) -> String {
    let mut conditions: Vec<String> = Vec::new();
    let mut param_index = 0u32;

    let mut push = |column: &str, enabled: bool| {
        if enabled {
            param_index += 1;
            conditions.push(format!("{column} = ${param_index}"));
        }
    };
    push("content_id", filters.content_id.is_some());
    push("site_id", filters.site_id.is_some());
    push("content_type", filters.content_type.is_some());
    push("rule_id", filters.rule_id.is_some());
    push("severity", filters.severity.is_some());
    push("is_stale", filters.stale.is_some());
    push("is_suppressed", filters.suppressed.is_some());

    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

#[async_trait]
impl ContentRepository for PgStore {
    async fn get_content(&self, id: i64) -> Result<Option<ContentItem>, AppError> {
        let item = sqlx::query_as::<_, ContentItem>("SELECT * FROM content_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    async fn upsert_content(
        &self,
        id: i64,
        site_id: i64,
        input: &UpsertContent,
    ) -> Result<ContentItem, AppError> {
        let item = sqlx::query_as::<_, ContentItem>(
            "INSERT INTO content_items (id, site_id, content_type, author_id, title, body) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET \
             site_id = EXCLUDED.site_id, content_type = EXCLUDED.content_type, \
             author_id = EXCLUDED.author_id, title = EXCLUDED.title, body = EXCLUDED.body, \
             updated_at = NOW() \
             RETURNING *",
        )
        .bind(id)
        .bind(site_id)
        .bind(&input.content_type)
        .bind(input.author_id)
        .bind(&input.title)
        .bind(&input.body)
        .fetch_one(&self.pool)
        .await?;
        Ok(item)
    }

    async fn delete_content(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM content_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn queue_scan(&self, id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE content_items SET scan_queued = TRUE, queued_at = COALESCE(queued_at, NOW()) \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn queued_content(&self, limit: i64) -> Result<Vec<ContentItem>, AppError> {
        let items = sqlx::query_as::<_, ContentItem>(
            "SELECT * FROM content_items WHERE scan_queued \
             ORDER BY queued_at ASC NULLS LAST, id ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn mark_scanned(&self, id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE content_items SET scan_queued = FALSE, queued_at = NULL, last_scanned_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
