//! Collection run: pick stale items, fetch them in budgeted batches, write
//! snapshots and rescore.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::retry::backoff;
use crate::upstream::{BatchFetch, MetadataSource};
use viewpulse_core::time::now_millis;
use viewpulse_core::{EngineConfig, Error, Result, RetryConfig};
use viewpulse_envelope::PerformanceScorer;
use viewpulse_jobs::JobHandle;
use viewpulse_quota::{CallKind, QuotaLedger};
use viewpulse_store::{SqliteStore, TrackedItem};

#[derive(Debug, Clone, Copy)]
pub struct CollectParams {
    /// Upper bound on upstream calls for this run.
    pub max_external_calls: u32,
    /// Items whose latest snapshot is younger than this are skipped.
    pub staleness: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every candidate was attempted.
    #[default]
    Finished,
    /// The ledger refused the next batch's reservation.
    QuotaExhausted,
    /// The call ceiling bounded the candidate set; stale items may remain.
    CallLimit,
    /// A stop was requested on the job.
    Stopped,
}

/// Running totals for one collection run; also the job's progress payload.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectReport {
    pub processed: usize,
    pub failed: usize,
    pub quota_used: u32,
    pub calls: u32,
    pub candidates: usize,
    pub items_per_sec: f64,
    pub stop_reason: StopReason,
    pub duration_ms: u64,
}

impl CollectReport {
    fn stamp(&mut self, start: Instant) {
        let elapsed = start.elapsed();
        self.duration_ms = elapsed.as_millis() as u64;
        let secs = elapsed.as_secs_f64();
        self.items_per_sec = if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        };
    }
}

/// Snapshots captured before this instant are stale. Saturates for
/// thresholds longer than the clock can represent.
fn staleness_cutoff(now: i64, staleness: Duration) -> i64 {
    let window = i64::try_from(staleness.as_millis()).unwrap_or(i64::MAX);
    now.saturating_sub(window)
}

pub struct SnapshotCollector {
    store: Arc<SqliteStore>,
    ledger: Arc<QuotaLedger>,
    source: Arc<dyn MetadataSource>,
    batch_max: usize,
    retry: RetryConfig,
    score_ceiling: f64,
}

impl SnapshotCollector {
    pub fn new(
        store: Arc<SqliteStore>,
        ledger: Arc<QuotaLedger>,
        source: Arc<dyn MetadataSource>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            source,
            batch_max: config.batch_max.max(1),
            retry: config.retry.clone(),
            score_ceiling: config.score_ceiling,
        }
    }

    /// Run one collection pass.
    ///
    /// Ends normally on quota refusal, call limit, stop request or when the
    /// candidates run out. Returns `BatchTransport` once a batch has failed
    /// every retry; the partial report has already been written to `job`.
    pub async fn collect(&self, params: CollectParams, job: Option<&JobHandle>) -> Result<CollectReport> {
        let start = Instant::now();
        let mut report = CollectReport::default();

        let limit = params.max_external_calls as usize * self.batch_max;
        if limit == 0 {
            report.stop_reason = StopReason::CallLimit;
            report.stamp(start);
            return Ok(report);
        }

        let candidates = self
            .store
            .stale_items(staleness_cutoff(now_millis(), params.staleness), limit)?;
        report.candidates = candidates.len();

        // Scores within one run use the envelope as it was at run start.
        let scorer = PerformanceScorer::load(&self.store, self.score_ceiling)?;

        info!(
            "Collection started: {} candidates, up to {} calls",
            candidates.len(),
            params.max_external_calls
        );

        if candidates.len() == limit {
            report.stop_reason = StopReason::CallLimit;
        }

        for batch in candidates.chunks(self.batch_max) {
            if job.is_some_and(|j| j.should_stop()) {
                report.stop_reason = StopReason::Stopped;
                break;
            }

            let cost = CallKind::VideosList.unit_cost();
            if !self.ledger.try_reserve(CallKind::VideosList, cost)? {
                report.stop_reason = StopReason::QuotaExhausted;
                break;
            }
            report.quota_used += cost;
            report.calls += 1;

            let ids: Vec<String> = batch.iter().map(|item| item.id.clone()).collect();
            let fetched = match self.fetch_with_retry(&ids).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    report.stamp(start);
                    if let Some(job) = job {
                        job.report(&report)?;
                    }
                    return Err(e);
                }
            };

            self.apply_batch(&scorer, batch, fetched, &mut report)?;

            report.stamp(start);
            if let Some(job) = job {
                job.report(&report)?;
            }
        }

        report.stamp(start);
        info!(
            "Collection finished ({:?}): processed={}, failed={}, calls={}, {:.1} items/s",
            report.stop_reason, report.processed, report.failed, report.calls, report.items_per_sec
        );
        Ok(report)
    }

    /// Send one batch, retrying whole-batch failures. The batch's quota is
    /// reserved once by the caller; retries are not charged again.
    async fn fetch_with_retry(&self, ids: &[String]) -> Result<BatchFetch> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.fetch_batch(ids).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = backoff(&self.retry, attempt);
                    warn!(
                        "Batch of {} failed (attempt {}/{}), retrying in {:?}: {}",
                        ids.len(),
                        attempt,
                        self.retry.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(Error::BatchTransport {
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    fn apply_batch(
        &self,
        scorer: &PerformanceScorer,
        batch: &[TrackedItem],
        mut fetched: BatchFetch,
        report: &mut CollectReport,
    ) -> Result<()> {
        let captured_at = now_millis();

        for item in batch {
            let counts = match fetched.remove(&item.id) {
                Some(Ok(counts)) => counts,
                Some(Err(reason)) => {
                    warn!("{}", Error::ItemFetch { item_id: item.id.clone(), reason });
                    report.failed += 1;
                    continue;
                }
                None => {
                    debug!("Item {} missing from upstream response", item.id);
                    report.failed += 1;
                    continue;
                }
            };

            match self.store.record_snapshot(&item.id, captured_at, counts) {
                Ok(_) => {}
                Err(Error::NotFound(_)) => {
                    report.failed += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }

            let mut refreshed = item.clone();
            refreshed.view_count = counts.view_count;
            refreshed.like_count = counts.like_count;
            refreshed.comment_count = counts.comment_count;
            scorer.rescore_item(&self.store, &refreshed, captured_at)?;

            report.processed += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::FetchError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use tempfile::TempDir;
    use viewpulse_core::time::MILLIS_PER_DAY;
    use viewpulse_jobs::{JobKind, JobSupervisor};
    use viewpulse_store::{EnvelopeRow, ItemCounts, NewTrackedItem};

    /// Serves `views` for every id except those in `bad`; the first
    /// `transport_failures` calls fail outright.
    #[derive(Default)]
    struct FakeSource {
        views: HashMap<String, i64>,
        bad: HashSet<String>,
        transport_failures: Mutex<u32>,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl MetadataSource for FakeSource {
        async fn fetch_batch(&self, ids: &[String]) -> std::result::Result<BatchFetch, FetchError> {
            self.calls.lock().push(ids.len());
            {
                let mut remaining = self.transport_failures.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Transport("connection reset".into()));
                }
            }
            Ok(ids
                .iter()
                .filter_map(|id| {
                    if self.bad.contains(id) {
                        return Some((id.clone(), Err("malformed".to_string())));
                    }
                    self.views.get(id).map(|v| {
                        (
                            id.clone(),
                            Ok(ItemCounts {
                                view_count: *v,
                                ..Default::default()
                            }),
                        )
                    })
                })
                .collect())
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        config: EngineConfig,
        _dir: TempDir,
    }

    fn fixture(budget: u32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_defaults(dir.path()).unwrap();
        config.daily_quota_budget = budget;
        config.retry.initial_backoff_ms = 1;
        let store = Arc::new(SqliteStore::open(&config.data_paths.database).unwrap());
        Fixture {
            store,
            config,
            _dir: dir,
        }
    }

    impl Fixture {
        fn track(&self, count: usize, age_days: i64) -> FakeSource {
            let published_at = now_millis() - age_days * MILLIS_PER_DAY - 60_000;
            let mut source = FakeSource::default();
            for i in 0..count {
                let id = format!("v{:04}", i);
                self.store
                    .upsert_tracked_item(&NewTrackedItem {
                        id: id.clone(),
                        published_at,
                        ..Default::default()
                    })
                    .unwrap();
                source.views.insert(id, 5000);
            }
            source
        }

        fn collector(&self, source: Arc<FakeSource>) -> (SnapshotCollector, Arc<QuotaLedger>) {
            let ledger = Arc::new(QuotaLedger::new(self.store.clone(), &self.config).unwrap());
            (
                SnapshotCollector::new(self.store.clone(), ledger.clone(), source, &self.config),
                ledger,
            )
        }
    }

    fn params(max_calls: u32) -> CollectParams {
        CollectParams {
            max_external_calls: max_calls,
            staleness: Duration::from_secs(24 * 3600),
        }
    }

    #[tokio::test]
    async fn test_collect_batches_and_scores() {
        let fx = fixture(100);
        let source = Arc::new(fx.track(120, 10));
        fx.store
            .replace_envelope(&[EnvelopeRow {
                age_days: 10,
                p10: 100,
                p25: 500,
                p50: 2000,
                p75: 3000,
                p90: 4000,
                p95: 5000,
                sample_count: 30,
                recomputed_at: 0,
            }])
            .unwrap();
        let (collector, ledger) = fx.collector(source.clone());

        let report = collector.collect(params(10), None).await.unwrap();
        assert_eq!(report.processed, 120);
        assert_eq!(report.failed, 0);
        assert_eq!(report.calls, 3);
        assert_eq!(report.quota_used, 3);
        assert_eq!(report.stop_reason, StopReason::Finished);
        assert_eq!(*source.calls.lock(), vec![50, 50, 20]);
        assert_eq!(ledger.used().unwrap(), 3);

        let item = fx.store.get_tracked_item("v0000").unwrap().unwrap();
        assert_eq!(item.view_count, 5000);
        assert_eq!(item.temporal_performance_score, Some(2.5));
        assert_eq!(fx.store.get_snapshots_for_item("v0000").unwrap()[0].age_days, 10);

        // Everything is fresh now; a second pass has nothing to do.
        let again = collector.collect(params(10), None).await.unwrap();
        assert_eq!(again.candidates, 0);
        assert_eq!(again.calls, 0);
    }

    #[test]
    fn test_staleness_cutoff_saturates() {
        let now = 1_700_000_000_000;
        assert_eq!(staleness_cutoff(now, Duration::from_secs(60)), now - 60_000);
        assert_eq!(
            staleness_cutoff(now, Duration::from_secs(2_562_047_788_016 * 3600)),
            now - i64::MAX
        );
        assert_eq!(staleness_cutoff(-5, Duration::MAX), i64::MIN);
    }

    #[tokio::test]
    async fn test_huge_staleness_treats_snapshots_as_fresh() {
        let fx = fixture(100);
        let source = Arc::new(fx.track(5, 3));
        let (collector, _) = fx.collector(source.clone());
        collector.collect(params(5), None).await.unwrap();

        let huge = CollectParams {
            max_external_calls: 5,
            staleness: Duration::from_secs(2_562_047_788_016 * 3600),
        };
        let report = collector.collect(huge, None).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(report.stop_reason, StopReason::Finished);
    }

    #[tokio::test]
    async fn test_calls_bounded_by_limit() {
        let fx = fixture(100);
        let source = Arc::new(fx.track(175, 3));
        let (collector, _) = fx.collector(source.clone());

        let report = collector.collect(params(2), None).await.unwrap();
        assert_eq!(report.candidates, 100);
        assert_eq!(report.calls, 2);
        assert_eq!(report.processed, 100);
        assert_eq!(report.stop_reason, StopReason::CallLimit);
        assert_eq!(source.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_quota_refusal_ends_run_without_call() {
        let fx = fixture(1);
        let source = Arc::new(fx.track(80, 3));
        let (collector, ledger) = fx.collector(source.clone());

        let report = collector.collect(params(10), None).await.unwrap();
        assert_eq!(report.calls, 1);
        assert_eq!(report.processed, 50);
        assert_eq!(report.stop_reason, StopReason::QuotaExhausted);
        assert_eq!(source.calls.lock().len(), 1);
        assert_eq!(ledger.remaining().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_item_failures_are_counted_and_skipped() {
        let fx = fixture(100);
        let mut source = fx.track(10, 3);
        source.bad.insert("v0001".into());
        source.views.remove("v0002");
        let (collector, _) = fx.collector(Arc::new(source));

        let report = collector.collect(params(5), None).await.unwrap();
        assert_eq!(report.processed, 8);
        assert_eq!(report.failed, 2);
        assert!(fx.store.get_snapshots_for_item("v0001").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_without_extra_quota() {
        let fx = fixture(100);
        let source = fx.track(10, 3);
        *source.transport_failures.lock() = 2;
        let source = Arc::new(source);
        let (collector, ledger) = fx.collector(source.clone());

        let report = collector.collect(params(5), None).await.unwrap();
        assert_eq!(report.processed, 10);
        assert_eq!(report.calls, 1);
        assert_eq!(source.calls.lock().len(), 3);
        assert_eq!(ledger.used().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_progress() {
        let fx = fixture(100);
        let source = fx.track(60, 3);
        *source.transport_failures.lock() = 10;
        let (collector, _) = fx.collector(Arc::new(source));

        let supervisor = JobSupervisor::new(fx.store.clone());
        let job = supervisor.start(JobKind::Collect).unwrap();
        let handle = supervisor.begin(&job.id).unwrap();

        let err = collector.collect(params(5), Some(&handle)).await.unwrap_err();
        assert!(matches!(err, Error::BatchTransport { attempts: 3, .. }));

        let progress = supervisor.get(&job.id).unwrap().unwrap().progress.unwrap();
        assert_eq!(progress["calls"], 1);
        assert_eq!(progress["processed"], 0);
    }

    #[tokio::test]
    async fn test_stop_request_halts_between_batches() {
        let fx = fixture(100);
        let source = Arc::new(fx.track(60, 3));
        let (collector, _) = fx.collector(source.clone());

        let supervisor = JobSupervisor::new(fx.store.clone());
        let job = supervisor.start(JobKind::Collect).unwrap();
        let handle = supervisor.begin(&job.id).unwrap();
        supervisor.request_stop(&job.id).unwrap();

        let report = collector.collect(params(5), Some(&handle)).await.unwrap();
        assert_eq!(report.stop_reason, StopReason::Stopped);
        assert_eq!(report.calls, 0);
        assert!(source.calls.lock().is_empty());
    }
}
