//! Envelope rebuild: scan every age bucket, compute percentiles, swap the table.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::percentile::envelope_row;
use viewpulse_core::time::now_millis;
use viewpulse_core::{EngineConfig, Error, Result};
use viewpulse_jobs::JobHandle;
use viewpulse_store::{EnvelopeRow, SqliteStore};

/// Days between progress writes during a rebuild.
const PROGRESS_EVERY_DAYS: u32 = 30;

/// Result of one rebuild run. Also the job's progress payload.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub days_scanned: u32,
    pub days_computed: u32,
    pub days_skipped: u32,
    pub total_samples: usize,
    /// True once the new generation replaced the old one.
    pub swapped: bool,
    /// True if a stop request ended the scan early (no swap happens then).
    pub stopped: bool,
    pub duration_ms: u64,
}

pub struct EnvelopeBuilder {
    store: Arc<SqliteStore>,
    min_samples: usize,
    max_age_days: u32,
}

impl EnvelopeBuilder {
    pub fn new(store: Arc<SqliteStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            min_samples: config.min_envelope_samples,
            max_age_days: config.max_age_days,
        }
    }

    /// Recompute every age and replace the envelope table.
    pub fn rebuild(&self, job: Option<&JobHandle>) -> Result<RebuildReport> {
        self.rebuild_at(now_millis(), job)
    }

    /// Same as [`rebuild`](Self::rebuild) with an explicit generation timestamp.
    /// Identical snapshot data and timestamp produce identical rows.
    pub fn rebuild_at(&self, recomputed_at: i64, job: Option<&JobHandle>) -> Result<RebuildReport> {
        let start = std::time::Instant::now();
        let mut report = RebuildReport::default();

        info!("Starting envelope rebuild (ages 0..={})", self.max_age_days);

        let rows = match self.compute_rows(recomputed_at, job, &mut report)? {
            Some(rows) => rows,
            None => {
                report.stopped = true;
                report.duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    "Envelope rebuild stopped after {} days; previous envelope kept",
                    report.days_scanned
                );
                return Ok(report);
            }
        };

        self.store.replace_envelope(&rows)?;
        report.swapped = true;
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Envelope rebuild complete: computed={}, skipped={}, samples={}, duration={}ms",
            report.days_computed, report.days_skipped, report.total_samples, report.duration_ms
        );
        Ok(report)
    }

    /// Rows for every populated age, or `None` if the job asked to stop.
    fn compute_rows(
        &self,
        recomputed_at: i64,
        job: Option<&JobHandle>,
        report: &mut RebuildReport,
    ) -> Result<Option<Vec<EnvelopeRow>>> {
        let mut rows = Vec::new();

        for age in 0..=self.max_age_days {
            if job.is_some_and(|j| j.should_stop()) {
                return Ok(None);
            }

            let mut views = self.store.snapshot_views_at_age(age)?;
            report.days_scanned += 1;
            report.total_samples += views.len();

            match envelope_row(age, &mut views, self.min_samples, recomputed_at) {
                Ok(row) => {
                    rows.push(row);
                    report.days_computed += 1;
                }
                Err(Error::EnvelopeInsufficientData { age_days, samples }) => {
                    debug!("Skipping age {}: {} samples", age_days, samples);
                    report.days_skipped += 1;
                }
                Err(e) => return Err(e),
            }

            if let Some(job) = job {
                if (age + 1) % PROGRESS_EVERY_DAYS == 0 {
                    job.report(report)?;
                }
            }
        }

        Ok(Some(rows))
    }
}
