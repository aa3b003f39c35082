//! Temporal performance score: current views over the expected median at
//! the item's age.

use serde::Serialize;
use tracing::{debug, info};

use crate::curve::Envelope;
use viewpulse_core::time::{age_in_days, now_millis};
use viewpulse_core::Result;
use viewpulse_jobs::JobHandle;
use viewpulse_store::{ItemScoreUpdate, SqliteStore, TrackedItem};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    /// Clamped ratio; what gets cached on the item.
    pub ratio: f64,
    pub raw_ratio: f64,
    /// Expected views (envelope p50) used as the denominator.
    pub baseline_views: f64,
    pub requested_age: u32,
    /// Envelope age used after nearest-age fallback.
    pub envelope_age: u32,
    pub clamped: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RescoreReport {
    pub scored: usize,
    pub unscored: usize,
    pub stopped: bool,
}

/// Scores items against one loaded envelope generation.
pub struct PerformanceScorer {
    envelope: Envelope,
    ceiling: f64,
}

impl PerformanceScorer {
    pub fn new(envelope: Envelope, ceiling: f64) -> Self {
        Self { envelope, ceiling }
    }

    pub fn load(store: &SqliteStore, ceiling: f64) -> Result<Self> {
        Ok(Self::new(Envelope::load(store)?, ceiling))
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Score `item` as of `as_of_age_days`. `None` only when the envelope has
    /// no rows at all.
    pub fn score(&self, item: &TrackedItem, as_of_age_days: u32) -> Option<ScoreResult> {
        let row = self.envelope.lookup(as_of_age_days)?;
        // A zero median would divide by zero; one view is the smallest baseline.
        let baseline = row.p50.max(1) as f64;
        let raw_ratio = item.view_count.max(0) as f64 / baseline;
        let ratio = raw_ratio.min(self.ceiling);

        Some(ScoreResult {
            ratio,
            raw_ratio,
            baseline_views: row.p50 as f64,
            requested_age: as_of_age_days,
            envelope_age: row.age_days,
            clamped: raw_ratio > self.ceiling,
        })
    }

    /// Score at the item's age as of `now` (epoch millis).
    pub fn score_now(&self, item: &TrackedItem, now: i64) -> Option<ScoreResult> {
        self.score(item, age_in_days(item.published_at, now))
    }

    /// Recompute and cache one item's score. An empty envelope clears any
    /// stale cached score.
    pub fn rescore_item(
        &self,
        store: &SqliteStore,
        item: &TrackedItem,
        now: i64,
    ) -> Result<Option<ScoreResult>> {
        match self.score_now(item, now) {
            Some(result) => {
                store.update_item_score(
                    &item.id,
                    &ItemScoreUpdate {
                        score: result.ratio,
                        baseline_views: result.baseline_views,
                        age_days: result.requested_age,
                        envelope_age: result.envelope_age,
                        scored_at: now,
                    },
                )?;
                if result.clamped {
                    debug!(
                        "Score for {} clamped: {:.1} -> {:.1}",
                        item.id, result.raw_ratio, result.ratio
                    );
                }
                Ok(Some(result))
            }
            None => {
                store.clear_item_score(&item.id)?;
                Ok(None)
            }
        }
    }

    /// Rescore every tracked item, polling `job` for a stop request.
    pub fn rescore_all(&self, store: &SqliteStore, job: Option<&JobHandle>) -> Result<RescoreReport> {
        let now = now_millis();
        let mut report = RescoreReport::default();

        for (i, id) in store.all_tracked_item_ids()?.iter().enumerate() {
            if i % 500 == 0 && job.is_some_and(|j| j.should_stop()) {
                report.stopped = true;
                break;
            }
            let Some(item) = store.get_tracked_item(id)? else {
                continue;
            };
            match self.rescore_item(store, &item, now)? {
                Some(_) => report.scored += 1,
                None => report.unscored += 1,
            }
        }

        info!(
            "Rescored {} items ({} unscored{})",
            report.scored,
            report.unscored,
            if report.stopped { ", stopped early" } else { "" }
        );
        Ok(report)
    }
}
