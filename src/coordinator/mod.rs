//! Scan coordination: single-flight per content item, evaluation on a
//! blocking worker under a deadline, then reconciliation.

pub mod messages;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::config::AppConfig;
use crate::engine::{scan_markup, CheckRegistry, RuleCatalog, ScanReport};
use crate::errors::AppError;
use crate::models::finding::ViolationInput;
use crate::services::lifecycle::Lifecycle;
use crate::store::{bounded, ContentRepository, ReconcileOutcome};

pub use messages::{
    Envelope, InProcessChannel, InboundMessage, MessageChannel, OutboundMessage, SandboxHandle,
};

/// Per-item scan state. Absent from the state map means idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Saving,
}

/// What started a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanTrigger {
    Manual,
    Save,
    Scheduled,
    Sandbox,
}

type StateMap = Arc<Mutex<HashMap<i64, ScanState>>>;

/// Holds an item out of `Idle`; dropping it returns the item to `Idle`.
#[derive(Debug)]
pub struct ScanGuard {
    states: StateMap,
    content_id: i64,
}

impl ScanGuard {
    pub fn set(&self, state: ScanState) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.insert(self.content_id, state);
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.remove(&self.content_id);
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub trusted_origin: String,
    pub default_site_id: i64,
    pub excluded_rules: Vec<String>,
    pub scan_timeout: Duration,
    pub store_timeout: Duration,
    pub scheduled_batch: i64,
    pub settle_delay: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            trusted_origin: config.trusted_origin.clone(),
            default_site_id: config.site_id,
            excluded_rules: config.excluded_rules.clone(),
            scan_timeout: config.scan_timeout,
            store_timeout: config.store_timeout,
            scheduled_batch: config.scheduler_batch,
            settle_delay: config.scheduler_settle_delay,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub content_id: i64,
    pub trigger: ScanTrigger,
    pub report: ScanReport,
    pub outcome: ReconcileOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduledBatch {
    pub scanned: Vec<i64>,
    /// Busy items; they stay queued.
    pub skipped: Vec<i64>,
    pub failed: Vec<i64>,
}

pub struct ScanCoordinator {
    states: StateMap,
    lifecycle: Arc<Lifecycle>,
    content: Arc<dyn ContentRepository>,
    catalog: Arc<RuleCatalog>,
    checks: Arc<CheckRegistry>,
    settings: CoordinatorSettings,
}

impl ScanCoordinator {
    pub fn new(
        lifecycle: Arc<Lifecycle>,
        content: Arc<dyn ContentRepository>,
        catalog: Arc<RuleCatalog>,
        checks: Arc<CheckRegistry>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            lifecycle,
            content,
            catalog,
            checks,
            settings,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn state(&self, content_id: i64) -> ScanState {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(&content_id).copied().unwrap_or(ScanState::Idle)
    }

    /// Claim an idle item for scanning; `Conflict` when it is busy.
    pub fn try_begin(&self, content_id: i64) -> Result<ScanGuard, AppError> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get(&content_id) {
            return Err(AppError::Conflict(format!(
                "Content {content_id} is busy ({state:?})"
            )));
        }
        states.insert(content_id, ScanState::Scanning);
        Ok(ScanGuard {
            states: Arc::clone(&self.states),
            content_id,
        })
    }

    /// Evaluate the catalog against markup on a blocking worker.
    ///
    /// On timeout the worker is left to finish on its own; its result is dropped.
    pub async fn evaluate(&self, markup: String) -> Result<ScanReport, AppError> {
        let rules = self.catalog.all(&self.settings.excluded_rules);
        let checks = Arc::clone(&self.checks);
        let task = tokio::task::spawn_blocking(move || scan_markup(&markup, &rules, &checks));

        match tokio::time::timeout(self.settings.scan_timeout, task).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(AppError::Internal(format!("Scan worker failed: {e}"))),
            Err(_) => Err(AppError::Unavailable(format!(
                "Scan did not finish within {}s",
                self.settings.scan_timeout.as_secs()
            ))),
        }
    }

    /// Scan a stored content item and reconcile the result.
    pub async fn scan_content(
        &self,
        content_id: i64,
        trigger: ScanTrigger,
        acted_by: Option<i64>,
    ) -> Result<ScanResult, AppError> {
        let guard = self.try_begin(content_id)?;
        tracing::info!(content_id, ?trigger, "Scan started");

        let item = bounded(self.settings.store_timeout, self.content.get_content(content_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Content {content_id} not found")))?;

        let report = match self.evaluate(item.body.clone()).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(content_id, error = %e, "Scan failed");
                return Err(e);
            }
        };

        guard.set(ScanState::Saving);
        let outcome = self
            .lifecycle
            .reconcile(item.id, item.site_id, report.violations.clone(), acted_by)
            .await?;
        if outcome.content_found {
            bounded(self.settings.store_timeout, self.content.mark_scanned(item.id)).await?;
        }

        tracing::info!(
            content_id,
            ?trigger,
            violations = report.violations.len(),
            errors = report.errors.len(),
            "Scan complete"
        );
        drop(guard);

        Ok(ScanResult {
            content_id,
            trigger,
            report,
            outcome,
        })
    }

    /// Persist violations collected elsewhere. A missing content item is a no-op.
    pub async fn save_results(
        &self,
        content_id: i64,
        violations: Vec<ViolationInput>,
        acted_by: Option<i64>,
    ) -> Result<ReconcileOutcome, AppError> {
        let guard = self.try_begin(content_id)?;
        guard.set(ScanState::Saving);

        let site_id = bounded(self.settings.store_timeout, self.content.get_content(content_id))
            .await?
            .map(|item| item.site_id)
            .unwrap_or(self.settings.default_site_id);

        let outcome = self
            .lifecycle
            .reconcile(content_id, site_id, violations, acted_by)
            .await?;
        if outcome.content_found {
            bounded(self.settings.store_timeout, self.content.mark_scanned(content_id)).await?;
        }
        Ok(outcome)
    }

    /// Scan up to `limit` queued items, pausing `settle` after each rescan.
    pub async fn run_scheduled_batch(
        &self,
        limit: Option<i64>,
        settle: Duration,
    ) -> Result<ScheduledBatch, AppError> {
        let limit = limit.unwrap_or(self.settings.scheduled_batch).max(1);
        let queued = bounded(self.settings.store_timeout, self.content.queued_content(limit)).await?;
        let mut batch = ScheduledBatch::default();

        for item in queued {
            match self.scan_content(item.id, ScanTrigger::Scheduled, None).await {
                Ok(_) => {
                    batch.scanned.push(item.id);
                    if !settle.is_zero() {
                        tokio::time::sleep(settle).await;
                    }
                }
                Err(AppError::Conflict(_)) => {
                    tracing::debug!(content_id = item.id, "Queued item busy, leaving queued");
                    batch.skipped.push(item.id);
                }
                Err(e) => {
                    tracing::warn!(content_id = item.id, error = %e, "Scheduled scan failed");
                    batch.failed.push(item.id);
                }
            }
        }

        if !batch.scanned.is_empty() || !batch.failed.is_empty() {
            tracing::info!(
                scanned = batch.scanned.len(),
                skipped = batch.skipped.len(),
                failed = batch.failed.len(),
                "Scheduled batch complete"
            );
        }
        Ok(batch)
    }

    /// Act on a sandbox message. Messages from any origin other than the
    /// trusted one are refused.
    pub async fn handle_message(
        &self,
        origin: &str,
        message: InboundMessage,
        acted_by: Option<i64>,
    ) -> Result<OutboundMessage, AppError> {
        if origin != self.settings.trusted_origin {
            tracing::warn!(origin, "Ignoring message from untrusted origin");
            return Err(AppError::Forbidden("Untrusted message origin".to_string()));
        }

        match message {
            InboundMessage::StartScan { content_id } => {
                let result = self
                    .scan_content(content_id, ScanTrigger::Sandbox, acted_by)
                    .await?;
                Ok(OutboundMessage::ScanComplete {
                    content_id,
                    violations: result.report.violations.len(),
                    rules_evaluated: result.report.rules_evaluated,
                    errors: result.report.errors,
                })
            }
            InboundMessage::SaveScan {
                content_id,
                violations,
            } => {
                let outcome = self.save_results(content_id, violations, acted_by).await?;
                Ok(OutboundMessage::ScanSaved {
                    content_id,
                    outcome,
                })
            }
            InboundMessage::StartScheduledScan { limit } => {
                let batch = self
                    .run_scheduled_batch(limit, self.settings.settle_delay)
                    .await?;
                Ok(OutboundMessage::ScheduledScanComplete {
                    scanned: batch.scanned,
                    skipped: batch.skipped,
                    failed: batch.failed,
                })
            }
        }
    }

    /// Answer messages from `channel` until the sandbox side closes.
    pub async fn serve(&self, channel: &dyn MessageChannel) {
        while let Some(envelope) = channel.recv().await {
            let content_id = envelope.body.content_id();
            let reply = match self.handle_message(&envelope.origin, envelope.body, None).await {
                Ok(reply) => reply,
                Err(AppError::Forbidden(_)) => continue,
                Err(e) => OutboundMessage::failed(content_id, &e),
            };
            if let Err(e) = channel.send(reply).await {
                tracing::warn!(error = %e, "Sandbox went away before reply");
                break;
            }
        }
        tracing::debug!("Sandbox channel closed");
    }
}
