//! Row types for tracked items, snapshots, envelope rows, jobs and quota.

use serde::{Deserialize, Serialize};

/// A tracked video and its cached counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub published_at: i64,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    /// Expected views (envelope p50) used as the denominator at the last scoring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_views: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_performance_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_age_days: Option<u32>,
    /// Envelope age actually used after nearest-age fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_envelope_age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scored_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_snapshot_at: Option<i64>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Fields the hosting application supplies when it starts tracking an item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTrackedItem {
    pub id: String,
    pub published_at: i64,
    pub title: Option<String>,
    pub channel_id: Option<String>,
}

/// Current counters reported by the upstream source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
}

/// One point of an item's time series. Unique per (item, age).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub item_id: String,
    pub age_days: u32,
    pub captured_at: i64,
    pub capture_date: String,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
}

/// Percentiles of view count for a single age.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRow {
    pub age_days: u32,
    pub p10: i64,
    pub p25: i64,
    pub p50: i64,
    pub p75: i64,
    pub p90: i64,
    pub p95: i64,
    pub sample_count: usize,
    pub recomputed_at: i64,
}

/// Cached score written back onto a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ItemScoreUpdate {
    pub score: f64,
    pub baseline_views: f64,
    pub age_days: u32,
    pub envelope_age: u32,
    pub scored_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job row from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stop_requested: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Units consumed by one call kind on one budget day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub usage_date: String,
    pub kind: String,
    pub units: u32,
}

/// Outcome of an atomic check-and-record against the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaReservation {
    pub granted: bool,
    /// Units used on the budget day after this reservation (unchanged if refused).
    pub used: u32,
}

/// Store-level counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub tracked_items: i64,
    pub scored_items: i64,
    pub snapshots: i64,
    pub envelope_rows: i64,
    pub jobs: i64,
    pub db_path: String,
    pub db_size_mb: f64,
}
