use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use viewpulse_collect::{BatchFetch, CollectParams, FetchError, MetadataSource};
use viewpulse_core::time::{now_millis, MILLIS_PER_DAY};
use viewpulse_core::{EngineConfig, Error};
use viewpulse_jobs::{JobKind, JobStatus};
use viewpulse_runtime::Engine;
use viewpulse_store::{ItemCounts, NewTrackedItem};

struct StaticSource {
    views: HashMap<String, i64>,
    fail: bool,
}

#[async_trait]
impl MetadataSource for StaticSource {
    async fn fetch_batch(&self, ids: &[String]) -> Result<BatchFetch, FetchError> {
        if self.fail {
            return Err(FetchError::Unauthorized {
                status: 401,
                body: "bad key".into(),
            });
        }
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.views.get(id).map(|v| {
                    (
                        id.clone(),
                        Ok(ItemCounts {
                            view_count: *v,
                            like_count: v / 10,
                            comment_count: 1,
                        }),
                    )
                })
            })
            .collect())
    }
}

struct PanickingSource;

#[async_trait]
impl MetadataSource for PanickingSource {
    async fn fetch_batch(&self, _ids: &[String]) -> Result<BatchFetch, FetchError> {
        panic!("source bug");
    }
}

const POLL: Duration = Duration::from_millis(5);

/// 40 items published ten days ago with views 100, 200, ..., 4000.
fn engine(dir: &TempDir, fail: bool) -> Engine {
    let mut config = EngineConfig::with_defaults(dir.path()).unwrap();
    config.retry.initial_backoff_ms = 1;

    let mut views = HashMap::new();
    for i in 0..40 {
        views.insert(format!("vid{:02}", i), (i + 1) * 100);
    }
    let engine = Engine::open(config, Arc::new(StaticSource { views: views.clone(), fail })).unwrap();

    let published_at = now_millis() - 10 * MILLIS_PER_DAY - 60_000;
    for id in views.keys() {
        engine
            .track_item(&NewTrackedItem {
                id: id.clone(),
                published_at,
                title: Some(format!("Video {}", id)),
                channel_id: Some("chan".into()),
            })
            .unwrap();
    }
    engine
}

fn params() -> CollectParams {
    CollectParams {
        max_external_calls: 10,
        staleness: Duration::from_secs(3600),
    }
}

#[tokio::test]
async fn test_collect_rebuild_and_rank() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, false);

    let job_id = engine.start_collection(params()).unwrap();
    // The spawned run has not been polled yet; the second start must bounce.
    assert!(matches!(
        engine.start_collection(params()),
        Err(Error::ConcurrentRunRejected(_))
    ));
    assert_eq!(engine.list_jobs(Some(JobKind::Collect), 10).unwrap().len(), 1);

    let job = engine.wait_for_job(&job_id, POLL).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let progress = job.progress.unwrap();
    assert_eq!(progress["processed"], 40);
    assert_eq!(progress["calls"], 1);
    assert_eq!(progress["stopReason"], "finished");
    assert_eq!(engine.quota_status().unwrap().used, 1);

    // No envelope yet: nothing is scored.
    assert!(engine.top_performers(10, 0.0).unwrap().is_empty());
    assert!(engine.score_item("vid00").unwrap().is_none());

    let rebuild_id = engine.start_envelope_rebuild().unwrap();
    let rebuild = engine.wait_for_job(&rebuild_id, POLL).await.unwrap();
    assert_eq!(rebuild.status, JobStatus::Completed);
    let progress = rebuild.progress.unwrap();
    assert_eq!(progress["daysComputed"], 1);
    assert_eq!(progress["swapped"], true);
    assert_eq!(progress["rescore"]["scored"], 40);

    // Sorted [100..4000], n = 40: p50 is index 20, i.e. 2100.
    let top = engine.top_performers(3, 1.0).unwrap();
    assert_eq!(top[0].id, "vid39");
    assert_eq!(top[0].baseline_views, Some(2100.0));
    let expected = 4000.0 / 2100.0;
    assert!((top[0].temporal_performance_score.unwrap() - expected).abs() < 1e-9);

    let score = engine.score_item("vid20").unwrap().unwrap();
    assert_eq!(score.ratio, 1.0);
    assert_eq!(score.envelope_age, 10);

    assert_eq!(
        engine.latest_job(JobKind::EnvelopeRebuild).unwrap().unwrap().id,
        rebuild_id
    );
}

#[tokio::test]
async fn test_authorization_failure_fails_job() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, true);

    let job_id = engine.start_collection(params()).unwrap();
    let job = engine.wait_for_job(&job_id, POLL).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("3 attempts"));
    assert_eq!(job.progress.unwrap()["calls"], 1);
    // One reservation for the batch, however many retries.
    assert_eq!(engine.quota_status().unwrap().used, 1);

    // A failed run frees the slot for the next one.
    engine.start_collection(params()).unwrap();
}

#[tokio::test]
async fn test_stop_before_start_completes_early() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, false);

    let job_id = engine.start_collection(params()).unwrap();
    assert!(engine.request_stop(&job_id).unwrap());

    let job = engine.wait_for_job(&job_id, POLL).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.unwrap()["stopReason"], "stopped");
    assert_eq!(engine.quota_status().unwrap().used, 0);
    assert!(!engine.request_stop(&job_id).unwrap());
}

#[tokio::test]
async fn test_huge_staleness_still_terminates() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir, false);

    let huge = CollectParams {
        max_external_calls: 10,
        staleness: Duration::from_secs(2_562_047_788_016 * 3600),
    };
    let job_id = engine.start_collection(huge).unwrap();
    let job = engine.wait_for_job(&job_id, POLL).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    // Never-snapshotted items are always due.
    assert_eq!(job.progress.unwrap()["processed"], 40);

    let again = engine.start_collection(huge).unwrap();
    let job = engine.wait_for_job(&again, POLL).await.unwrap();
    assert_eq!(job.progress.unwrap()["candidates"], 0);
}

#[tokio::test]
async fn test_panicking_source_fails_job_and_frees_slot() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::with_defaults(dir.path()).unwrap();
    let engine = Engine::open(config, Arc::new(PanickingSource)).unwrap();
    engine
        .track_item(&NewTrackedItem {
            id: "vid00".into(),
            published_at: now_millis() - MILLIS_PER_DAY,
            ..Default::default()
        })
        .unwrap();

    let job_id = engine.start_collection(params()).unwrap();
    let job = engine.wait_for_job(&job_id, POLL).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("panicked"));

    engine.start_collection(params()).unwrap();
}
