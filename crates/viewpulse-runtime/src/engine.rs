//! Engine — owns the store, ledger, supervisor and upstream source, and
//! launches job-wrapped runs on the tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::types::RebuildJobReport;
use viewpulse_collect::{CollectParams, MetadataSource, SnapshotCollector, YouTubeDataSource};
use viewpulse_core::time::now_millis;
use viewpulse_core::{EngineConfig, Error, Result};
use viewpulse_envelope::{EnvelopeBuilder, PerformanceScorer, ScoreResult};
use viewpulse_jobs::{JobHandle, JobKind, JobRecord, JobSupervisor};
use viewpulse_quota::{QuotaLedger, QuotaStatus};
use viewpulse_store::{NewTrackedItem, SqliteStore, StoreStats, TrackedItem};

pub struct Engine {
    store: Arc<SqliteStore>,
    config: EngineConfig,
    ledger: Arc<QuotaLedger>,
    supervisor: Arc<JobSupervisor>,
    source: Arc<dyn MetadataSource>,
}

impl Engine {
    /// Open the store under `config.data_paths` and wire every component to it.
    pub fn open(config: EngineConfig, source: Arc<dyn MetadataSource>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open(&config.data_paths.database)?);
        let ledger = Arc::new(QuotaLedger::new(store.clone(), &config)?);
        let supervisor = Arc::new(JobSupervisor::new(store.clone()));

        info!(
            "Engine ready: db={}, daily budget={}",
            config.data_paths.database.display(),
            config.daily_quota_budget
        );

        Ok(Self {
            store,
            config,
            ledger,
            supervisor,
            source,
        })
    }

    /// Open with the YouTube Data API as the upstream source.
    pub fn with_youtube(config: EngineConfig) -> Result<Self> {
        let source = Arc::new(YouTubeDataSource::from_config(&config)?);
        Self::open(config, source)
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Collection parameters from the configured defaults.
    pub fn default_collect_params(&self) -> CollectParams {
        CollectParams {
            max_external_calls: self.config.default_max_calls,
            staleness: Duration::from_secs(self.config.default_stale_hours * 3600),
        }
    }

    // ---------------------------------------------------------------
    // Background runs
    // ---------------------------------------------------------------

    /// Start a collection run in the background and return its job id.
    ///
    /// Rejected with `ConcurrentRunRejected` while another collection is
    /// pending or processing. Must be called from within a tokio runtime.
    pub fn start_collection(&self, params: CollectParams) -> Result<String> {
        let job = self.supervisor.start(JobKind::Collect)?;

        let collector = SnapshotCollector::new(
            self.store.clone(),
            self.ledger.clone(),
            self.source.clone(),
            &self.config,
        );

        tokio::spawn(drive_job(
            self.supervisor.clone(),
            job.id.clone(),
            move |handle| async move { collector.collect(params, Some(&handle)).await },
        ));

        Ok(job.id)
    }

    /// Start an envelope rebuild in the background and return its job id.
    /// A successful swap is followed by a rescore of every tracked item.
    pub fn start_envelope_rebuild(&self) -> Result<String> {
        let job = self.supervisor.start(JobKind::EnvelopeRebuild)?;

        let builder = EnvelopeBuilder::new(self.store.clone(), &self.config);
        let store = self.store.clone();
        let ceiling = self.config.score_ceiling;

        tokio::spawn(drive_job(
            self.supervisor.clone(),
            job.id.clone(),
            move |handle| async move {
                tokio::task::spawn_blocking(move || -> Result<RebuildJobReport> {
                    let rebuild = builder.rebuild(Some(&handle))?;
                    let rescore = if rebuild.swapped {
                        let scorer = PerformanceScorer::load(&store, ceiling)?;
                        Some(scorer.rescore_all(&store, Some(&handle))?)
                    } else {
                        None
                    };
                    Ok(RebuildJobReport { rebuild, rescore })
                })
                .await
                .unwrap_or_else(|e| Err(Error::Internal(format!("rebuild task panicked: {}", e))))
            },
        ));

        Ok(job.id)
    }

    /// Raise the stop flag on a running job.
    pub fn request_stop(&self, job_id: &str) -> Result<bool> {
        self.supervisor.request_stop(job_id)
    }

    /// Poll until the job reaches a terminal state.
    pub async fn wait_for_job(&self, job_id: &str, poll: Duration) -> Result<JobRecord> {
        loop {
            let job = self
                .supervisor
                .get(job_id)?
                .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    // ---------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------

    pub fn job_status(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.supervisor.get(job_id)
    }

    pub fn latest_job(&self, kind: JobKind) -> Result<Option<JobRecord>> {
        self.supervisor.latest(kind)
    }

    pub fn list_jobs(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<JobRecord>> {
        self.supervisor.list(kind, limit)
    }

    pub fn quota_status(&self) -> Result<QuotaStatus> {
        self.ledger.status()
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.get_stats()
    }

    // ---------------------------------------------------------------
    // Items and scores
    // ---------------------------------------------------------------

    /// Start tracking an item, or refresh its title/channel if already tracked.
    pub fn track_item(&self, item: &NewTrackedItem) -> Result<()> {
        if item.id.trim().is_empty() {
            return Err(Error::Config("item id must not be empty".into()));
        }
        self.store.upsert_tracked_item(item)
    }

    pub fn top_performers(&self, limit: usize, min_score: f64) -> Result<Vec<TrackedItem>> {
        self.store.top_scored_items(limit, min_score)
    }

    /// Score one item now against the current envelope and cache the result.
    /// `Ok(None)` means no envelope exists yet.
    pub fn score_item(&self, item_id: &str) -> Result<Option<ScoreResult>> {
        let item = self
            .store
            .get_tracked_item(item_id)?
            .ok_or_else(|| Error::NotFound(format!("tracked item {}", item_id)))?;
        let scorer = PerformanceScorer::load(&self.store, self.config.score_ceiling)?;
        let result = scorer.rescore_item(&self.store, &item, now_millis())?;
        if result.is_none() {
            warn!("Item {} left unscored: envelope is empty", item_id);
        }
        Ok(result)
    }
}

/// Carry a pending job to a terminal state: begin it, run `run` on its own
/// task, then complete or fail it. A failed begin or a panicking run fails
/// the job instead of leaving it active.
async fn drive_job<P, F, Fut>(supervisor: Arc<JobSupervisor>, id: String, run: F)
where
    P: Serialize + Send + 'static,
    F: FnOnce(JobHandle) -> Fut + Send + 'static,
    Fut: Future<Output = Result<P>> + Send + 'static,
{
    let result = match supervisor.begin(&id) {
        Ok(handle) => tokio::spawn(run(handle))
            .await
            .unwrap_or_else(|e| Err(Error::Internal(format!("job task panicked: {}", e)))),
        Err(e) => Err(Error::Internal(format!("job could not start: {}", e))),
    };

    // On error the run has already written its last progress.
    let outcome = match result {
        Ok(report) => supervisor.complete(&id, &report),
        Err(e) => supervisor.fail(&id, &e.to_string(), None),
    };
    if let Err(e) = outcome {
        error!("Job {} could not record its outcome: {}", id, e);
    }
}
