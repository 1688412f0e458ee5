//! Background rescans of queued content.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::ScanCoordinator;

/// Poll the scan queue every `interval` until `shutdown` flips to `true`.
///
/// One batch runs at a time; ticks missed while a batch is running are
/// dropped rather than replayed.
pub fn spawn(
    coordinator: Arc<ScanCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let settle = coordinator.settings().settle_delay;
        tracing::info!(interval_secs = interval.as_secs(), "Scan scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = coordinator.run_scheduled_batch(None, settle).await {
                        tracing::warn!(error = %e, retryable = e.is_retryable(), "Scheduled batch failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scan scheduler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorSettings;
    use crate::engine::{builtin, NormalizedMarkupMatcher, RuleCatalog};
    use crate::models::content::UpsertContent;
    use crate::services::aggregation::StatsCache;
    use crate::services::lifecycle::Lifecycle;
    use crate::store::{ContentRepository, FindingStore, MemoryStore};
    use crate::models::finding::FindingFilters;

    #[tokio::test]
    async fn drains_queue_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let lifecycle = Arc::new(Lifecycle::new(
            store.clone(),
            Arc::new(NormalizedMarkupMatcher::new().unwrap()),
            Arc::new(StatsCache::new()),
            Duration::from_secs(5),
        ));
        let coordinator = Arc::new(ScanCoordinator::new(
            lifecycle,
            store.clone(),
            Arc::new(RuleCatalog::with_rules(builtin::rules())),
            Arc::new(builtin::checks().unwrap()),
            CoordinatorSettings {
                trusted_origin: "https://cms.test".to_string(),
                default_site_id: 1,
                excluded_rules: Vec::new(),
                scan_timeout: Duration::from_secs(10),
                store_timeout: Duration::from_secs(5),
                scheduled_batch: 10,
                settle_delay: Duration::ZERO,
            },
        ));

        store
            .upsert_content(
                3,
                1,
                &UpsertContent {
                    site_id: None,
                    content_type: "page".to_string(),
                    author_id: 1,
                    title: "Queued".to_string(),
                    body: "<img src=\"a.png\">".to_string(),
                    scan_on_save: false,
                },
            )
            .await
            .unwrap();
        assert!(store.queue_scan(3).await.unwrap());

        let (tx, rx) = watch::channel(false);
        let handle = spawn(coordinator, Duration::from_millis(20), rx);

        let mut drained = false;
        for _ in 0..100 {
            if store.queued_content(10).await.unwrap().is_empty() {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(drained);
        assert_eq!(
            store.count_findings(&FindingFilters::for_content(3)).await.unwrap(),
            1
        );

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
