//! Per-content summary statistics with a read-through cache.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::engine::{readability, Document, RuleCatalog};
use crate::errors::AppError;
use crate::models::finding::{Finding, SeverityClass};
use crate::store::{bounded, ContentRepository, FindingStore};

/// Scores how densely a piece of content is affected by issues.
///
/// Implementations must be non-decreasing in `issues` for fixed sizes and
/// must return 0 when both sizes are 0.
pub trait DensityScorer: Send + Sync {
    fn score(&self, issues: u64, element_count: usize, content_length: usize) -> f64;
}

/// Weighted blend of issues-per-element and issues-per-character.
#[derive(Debug, Clone, Copy)]
pub struct WeightedDensity {
    pub element_weight: f64,
    pub content_weight: f64,
}

impl Default for WeightedDensity {
    fn default() -> Self {
        Self {
            element_weight: 0.8,
            content_weight: 0.2,
        }
    }
}

impl DensityScorer for WeightedDensity {
    fn score(&self, issues: u64, element_count: usize, content_length: usize) -> f64 {
        let ratio = |denominator: usize| {
            if denominator == 0 {
                0.0
            } else {
                issues as f64 / denominator as f64
            }
        };
        let score =
            ratio(element_count) * self.element_weight + ratio(content_length) * self.content_weight;
        (score * 100.0 * 100.0).round() / 100.0
    }
}

/// Reading grade of plain text; `None` when not applicable.
pub trait ReadabilityGrader: Send + Sync {
    fn grade(&self, text: &str) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FleschKincaid;

impl ReadabilityGrader for FleschKincaid {
    fn grade(&self, text: &str) -> Option<f64> {
        readability::flesch_kincaid_grade(text)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggregateStats {
    pub content_id: i64,
    pub errors: u64,
    pub warnings: u64,
    pub contrast_errors: u64,
    pub suppressed: u64,
    pub stale: u64,
    pub rules_total: usize,
    pub rules_passed: usize,
    pub rules_failed: usize,
    /// `None` when no rules apply.
    pub pass_percentage: Option<u8>,
    pub issue_density: f64,
    pub element_count: usize,
    pub content_length: usize,
    pub readability: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

/// Size measures of a content body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMetrics {
    pub element_count: usize,
    pub content_length: usize,
    pub text: String,
}

impl DocumentMetrics {
    pub fn measure(markup: &str) -> Self {
        if markup.trim().is_empty() {
            return Self::default();
        }
        let document = Document::parse(markup);
        let text = document.text_content();
        Self {
            element_count: document.element_count(),
            content_length: text.chars().count(),
            text,
        }
    }
}

/// Pure computation over one item's findings and the applicable rule ids.
pub fn compute_stats(
    content_id: i64,
    findings: &[Finding],
    rule_ids: &[String],
    metrics: &DocumentMetrics,
    density: &dyn DensityScorer,
    grader: &dyn ReadabilityGrader,
) -> AggregateStats {
    let mut errors = 0;
    let mut warnings = 0;
    let mut contrast_errors = 0;
    let mut failing: HashSet<&str> = HashSet::new();

    for finding in findings.iter().filter(|f| f.is_active()) {
        match finding.severity {
            SeverityClass::Error => errors += 1,
            SeverityClass::Warning => warnings += 1,
            SeverityClass::Contrast => contrast_errors += 1,
        }
        failing.insert(finding.rule_id.as_str());
    }

    let suppressed = findings.iter().filter(|f| f.suppression.suppressed).count() as u64;
    let stale = findings
        .iter()
        .filter(|f| f.is_stale && !f.suppression.suppressed)
        .count() as u64;

    let rules_total = rule_ids.len();
    let rules_failed = rule_ids
        .iter()
        .filter(|id| failing.contains(id.as_str()))
        .count();
    let rules_passed = rules_total - rules_failed;
    let pass_percentage = (rules_total > 0)
        .then(|| ((rules_passed as f64 / rules_total as f64) * 100.0).round() as u8);

    let issues = errors + warnings + contrast_errors;

    AggregateStats {
        content_id,
        errors,
        warnings,
        contrast_errors,
        suppressed,
        stale,
        rules_total,
        rules_passed,
        rules_failed,
        pass_percentage,
        issue_density: density.score(issues, metrics.element_count, metrics.content_length),
        element_count: metrics.element_count,
        content_length: metrics.content_length,
        readability: grader.grade(&metrics.text),
        computed_at: Utc::now(),
    }
}

/// Cached stats per content item.
///
/// Every invalidation bumps the item's generation; a computed summary is only
/// stored if the generation it was computed under is still current.
#[derive(Debug, Default)]
pub struct StatsCache {
    state: RwLock<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<i64, AggregateStats>,
    generations: HashMap<i64, u64>,
    epoch: u64,
}

impl CacheState {
    fn generation(&self, content_id: i64) -> Generation {
        Generation {
            epoch: self.epoch,
            item: self.generations.get(&content_id).copied().unwrap_or(0),
        }
    }

    fn bump(&mut self, content_id: i64) -> bool {
        *self.generations.entry(content_id).or_insert(0) += 1;
        self.entries.remove(&content_id).is_some()
    }
}

/// Cache version observed before computing a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    item: u64,
}

impl StatsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, content_id: i64) -> Option<AggregateStats> {
        self.state.read().await.entries.get(&content_id).cloned()
    }

    pub async fn generation(&self, content_id: i64) -> Generation {
        self.state.read().await.generation(content_id)
    }

    /// Store `stats` unless the item was invalidated since `seen` was read.
    pub async fn put_if_current(&self, stats: AggregateStats, seen: Generation) -> bool {
        let mut state = self.state.write().await;
        if state.generation(stats.content_id) != seen {
            tracing::debug!(content_id = stats.content_id, "Discarded stats computed before invalidation");
            return false;
        }
        state.entries.insert(stats.content_id, stats);
        true
    }

    pub async fn invalidate(&self, content_id: i64) {
        if self.state.write().await.bump(content_id) {
            tracing::debug!(content_id, "Invalidated cached stats");
        }
    }

    pub async fn invalidate_many(&self, content_ids: &[i64]) {
        let mut state = self.state.write().await;
        for id in content_ids {
            state.bump(*id);
        }
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.generations.clear();
        state.epoch += 1;
        tracing::debug!("Cleared all cached stats");
    }
}

pub struct Aggregator {
    store: Arc<dyn FindingStore>,
    content: Arc<dyn ContentRepository>,
    catalog: Arc<RuleCatalog>,
    excluded_rules: Vec<String>,
    density: Arc<dyn DensityScorer>,
    grader: Arc<dyn ReadabilityGrader>,
    cache: Arc<StatsCache>,
    store_timeout: Duration,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn FindingStore>,
        content: Arc<dyn ContentRepository>,
        catalog: Arc<RuleCatalog>,
        excluded_rules: Vec<String>,
        cache: Arc<StatsCache>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            content,
            catalog,
            excluded_rules,
            density: Arc::new(WeightedDensity::default()),
            grader: Arc::new(FleschKincaid),
            cache,
            store_timeout,
        }
    }

    pub fn with_density(mut self, density: Arc<dyn DensityScorer>) -> Self {
        self.density = density;
        self
    }

    pub fn with_grader(mut self, grader: Arc<dyn ReadabilityGrader>) -> Self {
        self.grader = grader;
        self
    }

    /// Summary for one content item, served from cache when fresh.
    pub async fn summarize(&self, content_id: i64) -> Result<AggregateStats, AppError> {
        if let Some(stats) = self.cache.get(content_id).await {
            return Ok(stats);
        }
        let generation = self.cache.generation(content_id).await;

        let item = bounded(self.store_timeout, self.content.get_content(content_id)).await?;
        let findings = bounded(self.store_timeout, self.store.findings_for(content_id)).await?;
        if item.is_none() && findings.is_empty() {
            return Err(AppError::NotFound(format!("Content {content_id} not found")));
        }

        let metrics = item
            .map(|item| DocumentMetrics::measure(&item.body))
            .unwrap_or_default();
        let rule_ids: Vec<String> = self
            .catalog
            .all(&self.excluded_rules)
            .into_iter()
            .map(|r| r.id)
            .collect();

        let stats = compute_stats(
            content_id,
            &findings,
            &rule_ids,
            &metrics,
            self.density.as_ref(),
            self.grader.as_ref(),
        );
        tracing::debug!(
            content_id,
            errors = stats.errors,
            warnings = stats.warnings,
            "Computed stats"
        );
        self.cache.put_if_current(stats.clone(), generation).await;
        Ok(stats)
    }
}
