//! Job supervisor and the per-run handle.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::types::JobKind;
use viewpulse_core::time::now_millis;
use viewpulse_core::{Error, Result};
use viewpulse_store::{JobRecord, JobStatus, SqliteStore};

/// Terminal jobs kept per kind; older ones are pruned when a new job starts.
pub const DEFAULT_RETENTION: usize = 100;

/// Creates, transitions and reports on job records.
pub struct JobSupervisor {
    store: Arc<SqliteStore>,
    retention: usize,
}

impl JobSupervisor {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(store: Arc<SqliteStore>, retention: usize) -> Self {
        Self { store, retention }
    }

    /// Create a pending job of `kind`. Fails with `ConcurrentRunRejected`
    /// if one is already pending or processing; no row is written then.
    pub fn start(&self, kind: JobKind) -> Result<JobRecord> {
        match self.store.prune_terminal_jobs(kind.as_str(), self.retention) {
            Ok(0) => {}
            Ok(n) => info!("Pruned {} old {} jobs", n, kind),
            Err(e) => warn!("Failed to prune old {} jobs: {}", kind, e),
        }

        let id = uuid::Uuid::new_v4().to_string();
        let job = self.store.insert_job(&id, kind.as_str(), now_millis())?;
        info!("Job {} created ({})", job.id, kind);
        Ok(job)
    }

    /// Move a pending job to `processing` and hand back the run's handle.
    pub fn begin(&self, id: &str) -> Result<JobHandle> {
        self.transition(id, &[JobStatus::Pending], JobStatus::Processing, None, None)?;
        let job = self.require(id)?;
        Ok(JobHandle {
            id: job.id,
            kind: job.kind,
            store: self.store.clone(),
        })
    }

    pub fn update_progress<P: Serialize>(&self, id: &str, progress: &P) -> Result<()> {
        let value = serde_json::to_value(progress)?;
        if !self.store.update_job_progress(id, &value, now_millis())? {
            let job = self.require(id)?;
            return Err(Error::InvalidTransition {
                job_id: id.to_string(),
                from: job.status.to_string(),
                to: "progress".to_string(),
            });
        }
        Ok(())
    }

    pub fn complete<P: Serialize>(&self, id: &str, progress: &P) -> Result<()> {
        let value = serde_json::to_value(progress)?;
        self.transition(
            id,
            &[JobStatus::Pending, JobStatus::Processing],
            JobStatus::Completed,
            Some(&value),
            None,
        )?;
        info!("Job {} completed", id);
        Ok(())
    }

    pub fn fail(&self, id: &str, error: &str, progress: Option<&serde_json::Value>) -> Result<()> {
        self.transition(
            id,
            &[JobStatus::Pending, JobStatus::Processing],
            JobStatus::Failed,
            progress,
            Some(error),
        )?;
        error!("Job {} failed: {}", id, error);
        Ok(())
    }

    /// Raise the cooperative stop flag. Returns false if the job is unknown
    /// or already terminal.
    pub fn request_stop(&self, id: &str) -> Result<bool> {
        let raised = self.store.set_job_stop_requested(id, now_millis())?;
        if raised {
            info!("Stop requested for job {}", id);
        }
        Ok(raised)
    }

    pub fn is_stop_requested(&self, id: &str) -> Result<bool> {
        self.store.is_job_stop_requested(id)
    }

    pub fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        self.store.get_job(id)
    }

    pub fn latest(&self, kind: JobKind) -> Result<Option<JobRecord>> {
        self.store.latest_job(kind.as_str())
    }

    pub fn list(&self, kind: Option<JobKind>, limit: usize) -> Result<Vec<JobRecord>> {
        self.store.list_jobs(kind.map(|k| k.as_str()), limit)
    }

    fn require(&self, id: &str) -> Result<JobRecord> {
        self.store
            .get_job(id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    fn transition(
        &self,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
        progress: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<()> {
        if self
            .store
            .transition_job(id, from, to, progress, error, now_millis())?
        {
            return Ok(());
        }
        let job = self.require(id)?;
        Err(Error::InvalidTransition {
            job_id: id.to_string(),
            from: job.status.to_string(),
            to: to.to_string(),
        })
    }
}

/// Given to the code performing a run: reports progress and polls the stop flag.
#[derive(Clone)]
pub struct JobHandle {
    id: String,
    kind: String,
    store: Arc<SqliteStore>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Overwrite the job's progress payload. Returns false, writing nothing,
    /// once the job is terminal.
    pub fn report<P: Serialize>(&self, progress: &P) -> Result<bool> {
        let value = serde_json::to_value(progress)?;
        let written = self.store.update_job_progress(&self.id, &value, now_millis())?;
        if !written {
            warn!("Progress for job {} dropped: job is no longer active", self.id);
        }
        Ok(written)
    }

    /// Whether a stop was requested. Read failures count as "keep going".
    pub fn should_stop(&self) -> bool {
        match self.store.is_job_stop_requested(&self.id) {
            Ok(flag) => flag,
            Err(e) => {
                warn!("Could not read stop flag for job {}: {}", self.id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_supervisor() -> (JobSupervisor, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("viewpulse.db")).unwrap());
        (JobSupervisor::new(store), dir)
    }

    #[test]
    fn test_full_lifecycle() {
        let (sup, _dir) = test_supervisor();
        let job = sup.start(JobKind::Collect).unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let handle = sup.begin(&job.id).unwrap();
        handle.report(&serde_json::json!({"processed": 10})).unwrap();
        let live = sup.get(&job.id).unwrap().unwrap();
        assert_eq!(live.status, JobStatus::Processing);
        assert_eq!(live.progress.unwrap()["processed"], 10);

        sup.complete(&job.id, &serde_json::json!({"processed": 20}))
            .unwrap();
        let done = sup.get(&job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress.unwrap()["processed"], 20);
    }

    #[test]
    fn test_second_start_rejected_without_row() {
        let (sup, _dir) = test_supervisor();
        let first = sup.start(JobKind::Collect).unwrap();
        sup.begin(&first.id).unwrap();

        let second = sup.start(JobKind::Collect);
        assert!(matches!(second, Err(Error::ConcurrentRunRejected(_))));
        assert_eq!(sup.list(Some(JobKind::Collect), 10).unwrap().len(), 1);

        // Other kinds run independently.
        sup.start(JobKind::EnvelopeRebuild).unwrap();
    }

    #[test]
    fn test_terminal_states_are_final() {
        let (sup, _dir) = test_supervisor();
        let job = sup.start(JobKind::EnvelopeRebuild).unwrap();
        sup.begin(&job.id).unwrap();
        sup.fail(&job.id, "upstream unreachable", None).unwrap();

        let err = sup.complete(&job.id, &serde_json::json!({}));
        assert!(matches!(err, Err(Error::InvalidTransition { ref from, .. }) if from == "failed"));
        assert!(sup.begin(&job.id).is_err());
        assert!(sup.update_progress(&job.id, &serde_json::json!({})).is_err());
        assert!(!sup.request_stop(&job.id).unwrap());

        let job = sup.get(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("upstream unreachable"));
    }

    #[test]
    fn test_stop_is_cooperative() {
        let (sup, _dir) = test_supervisor();
        let job = sup.start(JobKind::Collect).unwrap();
        let handle = sup.begin(&job.id).unwrap();
        assert!(!handle.should_stop());

        assert!(sup.request_stop(&job.id).unwrap());
        assert!(handle.should_stop());
        // The flag alone changes nothing; the run decides when to finish.
        assert_eq!(sup.get(&job.id).unwrap().unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_report_after_terminal_is_not_written() {
        let (sup, _dir) = test_supervisor();
        let job = sup.start(JobKind::Collect).unwrap();
        let handle = sup.begin(&job.id).unwrap();
        assert!(handle.report(&serde_json::json!({"processed": 1})).unwrap());

        sup.complete(&job.id, &serde_json::json!({"processed": 2})).unwrap();
        assert!(!handle.report(&serde_json::json!({"processed": 3})).unwrap());
        let done = sup.get(&job.id).unwrap().unwrap();
        assert_eq!(done.progress.unwrap()["processed"], 2);
    }

    #[test]
    fn test_latest_by_kind() {
        let (sup, _dir) = test_supervisor();
        let a = sup.start(JobKind::Collect).unwrap();
        sup.complete(&a.id, &serde_json::json!({})).unwrap();
        let b = sup.start(JobKind::Collect).unwrap();

        assert_eq!(sup.latest(JobKind::Collect).unwrap().unwrap().id, b.id);
        assert!(sup.latest(JobKind::EnvelopeRebuild).unwrap().is_none());
        assert!(sup.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_retention_prunes_old_terminal_jobs() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("viewpulse.db")).unwrap());
        let sup = JobSupervisor::with_retention(store, 2);
        for _ in 0..4 {
            let job = sup.start(JobKind::Collect).unwrap();
            sup.complete(&job.id, &serde_json::json!({})).unwrap();
        }
        // Pruning runs before each insert: 2 kept + the newest one.
        assert_eq!(sup.list(Some(JobKind::Collect), 10).unwrap().len(), 3);
    }
}
