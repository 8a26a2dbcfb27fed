//! The batch loop: fetch plots in pages, skip the already-enriched,
//! resolve the rest with a small worker pool, merge, and persist.
//!
//! Failure policy: a failed batch read is fatal (the loop cannot make
//! progress without the source table), everything else is per-item and
//! soft. A plot whose resolution, merge, or write fails is logged and
//! counted; the run continues.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use plot_enrich_models::EnrichmentDocument;
use tokio::task::JoinSet;

use crate::EnrichError;
use crate::merge::merge_category;
use crate::resolve::{ALL_CATEGORIES, PointResolver};
use crate::store::{EnrichmentStore, PlotRow};

const MIN_CONCURRENCY: usize = 1;
const MAX_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Plots fetched per page from the store.
    pub batch_size: u64,
    /// Worker count, clamped to `1..=5` at run time. The regional portals
    /// are shared public infrastructure; five concurrent clients is
    /// already pushing what some of them tolerate.
    pub concurrency: usize,
    /// Pause each worker takes after finishing an item.
    pub inter_item_delay: Duration,
    /// Stop after this many plots have been processed (dry runs).
    pub dry_run_limit: Option<u64>,
    /// Re-resolve plots that already have every category.
    pub force_refresh: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 2,
            inter_item_delay: Duration::from_millis(250),
            dry_run_limit: None,
            force_refresh: false,
        }
    }
}

impl OrchestratorConfig {
    /// Reads the `PLOT_ENRICH_*` environment overrides on top of the
    /// defaults. Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(batch_size) = env_parse::<u64>("PLOT_ENRICH_BATCH_SIZE") {
            config.batch_size = batch_size.max(1);
        }
        if let Some(concurrency) = env_parse::<usize>("PLOT_ENRICH_CONCURRENCY") {
            config.concurrency = concurrency;
        }
        if let Some(delay_ms) = env_parse::<u64>("PLOT_ENRICH_DELAY_MS") {
            config.inter_item_delay = Duration::from_millis(delay_ms);
        }
        if let Some(limit) = env_parse::<u64>("PLOT_ENRICH_DRY_RUN_LIMIT") {
            config.dry_run_limit = Some(limit);
        }
        if let Ok(value) = std::env::var("PLOT_ENRICH_FORCE_REFRESH") {
            config.force_refresh = value == "1" || value.eq_ignore_ascii_case("true");
        }

        config
    }

    fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::warn!("Ignoring unparseable {name}={value}");
            None
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The source table was exhausted.
    Done,
    /// The dry-run limit was reached before the table was exhausted.
    Stopped,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub state: RunState,
}

struct WorkItem {
    row: PlotRow,
    existing: EnrichmentDocument,
}

/// Runs the enrichment loop to completion.
///
/// # Errors
///
/// * `EnrichError::Storage` when a batch read from the store fails. All
///   other failures are per-item and only reflected in the outcome
///   counters.
pub async fn run(
    store: Arc<dyn EnrichmentStore>,
    resolver: Arc<dyn PointResolver>,
    config: &OrchestratorConfig,
) -> Result<BatchOutcome, EnrichError> {
    let processed = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));
    let mut skipped: u64 = 0;
    let mut offset: u64 = 0;
    let mut state = RunState::Done;

    loop {
        let rows = store.fetch_batch(offset, config.batch_size).await?;
        if rows.is_empty() {
            break;
        }
        offset += rows.len() as u64;

        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let mut existing = store.existing_enrichment(&ids).await?;

        let mut work: Vec<WorkItem> = Vec::with_capacity(rows.len());
        for row in rows {
            let document = existing.remove(&row.id).unwrap_or_default();
            if !config.force_refresh && is_fully_enriched(&document) {
                log::debug!("Plot {} already enriched, skipping", row.id);
                skipped += 1;
                continue;
            }
            work.push(WorkItem {
                row,
                existing: document,
            });
        }

        if let Some(limit) = config.dry_run_limit {
            let remaining = limit.saturating_sub(processed.load(Ordering::SeqCst));
            let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
            if work.len() >= remaining {
                work.truncate(remaining);
                state = RunState::Stopped;
            }
        }

        if !work.is_empty() {
            log::info!(
                "Processing {} plot(s) with {} worker(s)",
                work.len(),
                config.effective_concurrency()
            );
            dispatch(
                Arc::clone(&store),
                Arc::clone(&resolver),
                config,
                work,
                &processed,
                &failed,
            )
            .await;
        }

        if state == RunState::Stopped {
            log::info!("Dry-run limit reached, stopping");
            break;
        }
    }

    Ok(BatchOutcome {
        processed: processed.load(Ordering::SeqCst),
        skipped,
        failed: failed.load(Ordering::SeqCst),
        state,
    })
}

/// A document is complete when every category key is present; partial
/// documents get re-resolved so earlier sentinel or failed categories can
/// fill in.
fn is_fully_enriched(document: &EnrichmentDocument) -> bool {
    ALL_CATEGORIES
        .iter()
        .all(|category| document.contains_key(category.as_ref()))
}

/// Fans one batch's work items out over the worker pool. Workers pull
/// items through a shared atomic cursor, so a slow portal stalls one
/// worker instead of a fixed slice of the batch.
async fn dispatch(
    store: Arc<dyn EnrichmentStore>,
    resolver: Arc<dyn PointResolver>,
    config: &OrchestratorConfig,
    work: Vec<WorkItem>,
    processed: &Arc<AtomicU64>,
    failed: &Arc<AtomicU64>,
) {
    let work = Arc::new(work);
    let cursor = Arc::new(AtomicUsize::new(0));
    let workers = config.effective_concurrency().min(work.len());
    let delay = config.inter_item_delay;

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let store = Arc::clone(&store);
        let resolver = Arc::clone(&resolver);
        let work = Arc::clone(&work);
        let cursor = Arc::clone(&cursor);
        let processed = Arc::clone(processed);
        let failed = Arc::clone(failed);

        set.spawn(async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(item) = work.get(index) else {
                    break;
                };

                if process_item(store.as_ref(), resolver.as_ref(), item).await {
                    processed.fetch_add(1, Ordering::SeqCst);
                } else {
                    failed.fetch_add(1, Ordering::SeqCst);
                }

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        });
    }

    while let Some(result) = set.join_next().await {
        if let Err(e) = result {
            log::error!("Worker task panicked: {e}");
        }
    }
}

/// Resolves, merges, and persists one plot. Returns `false` on any
/// per-item failure; the document is never written if a merge would drop
/// data another producer owns.
async fn process_item(
    store: &dyn EnrichmentStore,
    resolver: &dyn PointResolver,
    item: &WorkItem,
) -> bool {
    let payloads = resolver.resolve(&item.row.point).await;

    let mut document = item.existing.clone();
    for (category, payload) in payloads {
        match merge_category(&document, category.as_ref(), payload) {
            Ok(merged) => document = merged,
            Err(e) => {
                log::error!("Plot {}: refusing to persist: {e}", item.row.id);
                return false;
            }
        }
    }

    match store.upsert_enrichment(item.row.id, &document).await {
        Ok(()) => {
            log::debug!("Plot {}: document updated", item.row.id);
            true
        }
        Err(e) => {
            log::warn!("Plot {}: write failed: {e}", item.row.id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use plot_enrich_models::{GeoPoint, RecordCategory};
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    struct StubResolver;

    #[async_trait]
    impl PointResolver for StubResolver {
        async fn resolve(&self, _point: &GeoPoint) -> Vec<(RecordCategory, serde_json::Value)> {
            ALL_CATEGORIES
                .into_iter()
                .map(|category| (category, json!({"feature_count": 1})))
                .collect()
        }
    }

    struct FailingUpsertStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl EnrichmentStore for FailingUpsertStore {
        async fn fetch_batch(&self, offset: u64, limit: u64) -> Result<Vec<PlotRow>, EnrichError> {
            self.inner.fetch_batch(offset, limit).await
        }

        async fn existing_enrichment(
            &self,
            ids: &[i64],
        ) -> Result<BTreeMap<i64, EnrichmentDocument>, EnrichError> {
            self.inner.existing_enrichment(ids).await
        }

        async fn upsert_enrichment(
            &self,
            _id: i64,
            _document: &EnrichmentDocument,
        ) -> Result<(), EnrichError> {
            Err(EnrichError::storage("disk full"))
        }
    }

    fn rows(count: i64) -> Vec<PlotRow> {
        (0..count)
            .map(|id| PlotRow {
                id,
                point: GeoPoint::new(2.17, 41.38).unwrap(),
            })
            .collect()
    }

    fn quick_config() -> OrchestratorConfig {
        OrchestratorConfig {
            batch_size: 2,
            concurrency: 2,
            inter_item_delay: Duration::ZERO,
            dry_run_limit: None,
            force_refresh: false,
        }
    }

    #[tokio::test]
    async fn enriches_every_plot_across_batches() {
        let store = Arc::new(MemoryStore::new(rows(5)));
        let outcome = run(store.clone(), Arc::new(StubResolver), &quick_config())
            .await
            .unwrap();

        assert_eq!(outcome.processed, 5);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.state, RunState::Done);
        for id in 0..5 {
            let document = store.document(id).unwrap();
            for category in ALL_CATEGORIES {
                assert!(document.contains_key(category.as_ref()), "{category}");
            }
        }
    }

    #[tokio::test]
    async fn skips_fully_enriched_plots() {
        let store = Arc::new(MemoryStore::new(rows(2)));
        let full: EnrichmentDocument = ALL_CATEGORIES
            .into_iter()
            .map(|category| (category.as_ref().to_string(), json!({"seed": true})))
            .collect();
        store.seed_document(0, full.clone());

        let outcome = run(store.clone(), Arc::new(StubResolver), &quick_config())
            .await
            .unwrap();

        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped, 1);
        // Skipped plot's document is untouched.
        assert_eq!(store.document(0).unwrap(), full);
    }

    #[tokio::test]
    async fn force_refresh_re_resolves_complete_documents() {
        let store = Arc::new(MemoryStore::new(rows(1)));
        let full: EnrichmentDocument = ALL_CATEGORIES
            .into_iter()
            .map(|category| (category.as_ref().to_string(), json!({"seed": true})))
            .collect();
        store.seed_document(0, full);

        let config = OrchestratorConfig {
            force_refresh: true,
            ..quick_config()
        };
        let outcome = run(store.clone(), Arc::new(StubResolver), &config)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(store.document(0).unwrap()["cadastral"]["feature_count"], 1);
    }

    #[tokio::test]
    async fn dry_run_limit_stops_early() {
        let store = Arc::new(MemoryStore::new(rows(10)));
        let config = OrchestratorConfig {
            dry_run_limit: Some(3),
            ..quick_config()
        };

        let outcome = run(store.clone(), Arc::new(StubResolver), &config)
            .await
            .unwrap();

        assert_eq!(outcome.processed, 3);
        assert_eq!(outcome.state, RunState::Stopped);
        assert!(store.document(9).is_none());
    }

    #[tokio::test]
    async fn preserves_keys_owned_by_other_producers() {
        let store = Arc::new(MemoryStore::new(rows(1)));
        store.seed_document(
            0,
            [
                ("amenities".to_string(), json!({"schools": 3})),
                ("street_view".to_string(), json!("https://example.com/p/1")),
            ]
            .into_iter()
            .collect(),
        );

        run(store.clone(), Arc::new(StubResolver), &quick_config())
            .await
            .unwrap();

        let document = store.document(0).unwrap();
        assert_eq!(document["amenities"]["schools"], 3);
        assert_eq!(document["street_view"], "https://example.com/p/1");
        assert!(document.contains_key("zoning"));
    }

    #[tokio::test]
    async fn rejected_merge_leaves_stored_document_unchanged() {
        // Simulates a faulty merge implementation that drops the
        // amenities key while writing cadastral: the preservation check
        // must reject it, and the store must never see the bad document.
        let store = MemoryStore::new(rows(1));
        let existing: EnrichmentDocument = [
            ("amenities".to_string(), json!({"schools": 3})),
        ]
        .into_iter()
        .collect();
        store.seed_document(0, existing.clone());

        let mut faulty = existing.clone();
        faulty.remove("amenities");
        faulty.insert("cadastral".to_string(), json!({"feature_count": 1}));

        if crate::merge::verify_preserved(&existing, &faulty, "cadastral").is_ok() {
            store.upsert_enrichment(0, &faulty).await.unwrap();
        }

        assert_eq!(store.document(0).unwrap(), existing);
    }

    #[tokio::test]
    async fn write_failures_are_counted_not_fatal() {
        let store = Arc::new(FailingUpsertStore {
            inner: MemoryStore::new(rows(3)),
        });

        let outcome = run(store, Arc::new(StubResolver), &quick_config())
            .await
            .unwrap();

        assert_eq!(outcome.processed, 0);
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.state, RunState::Done);
    }

    #[test]
    fn concurrency_is_clamped() {
        let config = OrchestratorConfig {
            concurrency: 64,
            ..quick_config()
        };
        assert_eq!(config.effective_concurrency(), 5);

        let config = OrchestratorConfig {
            concurrency: 0,
            ..quick_config()
        };
        assert_eq!(config.effective_concurrency(), 1);
    }
}
