//! Database schema SQL.

/// Tracked items and their view-count time series.
pub const ITEMS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tracked_items (
    id TEXT PRIMARY KEY,
    title TEXT,
    channel_id TEXT,
    published_at INTEGER NOT NULL,
    view_count INTEGER NOT NULL DEFAULT 0,
    like_count INTEGER NOT NULL DEFAULT 0,
    comment_count INTEGER NOT NULL DEFAULT 0,
    baseline_views REAL,
    temporal_performance_score REAL,
    score_age_days INTEGER,
    score_envelope_age INTEGER,
    scored_at INTEGER,
    last_snapshot_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_items_last_snapshot ON tracked_items(last_snapshot_at);
CREATE INDEX IF NOT EXISTS idx_items_score ON tracked_items(temporal_performance_score);

CREATE TABLE IF NOT EXISTS snapshots (
    item_id TEXT NOT NULL REFERENCES tracked_items(id),
    age_days INTEGER NOT NULL CHECK (age_days >= 0),
    captured_at INTEGER NOT NULL,
    capture_date TEXT NOT NULL,
    view_count INTEGER NOT NULL,
    like_count INTEGER NOT NULL,
    comment_count INTEGER NOT NULL,
    PRIMARY KEY (item_id, age_days)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_age_views ON snapshots(age_days, view_count);
"#;

/// Per-age percentile curves. Replaced wholesale inside one transaction.
pub const ENVELOPE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS envelope (
    age_days INTEGER PRIMARY KEY CHECK (age_days BETWEEN 0 AND 365),
    p10 INTEGER NOT NULL,
    p25 INTEGER NOT NULL,
    p50 INTEGER NOT NULL,
    p75 INTEGER NOT NULL,
    p90 INTEGER NOT NULL,
    p95 INTEGER NOT NULL,
    sample_count INTEGER NOT NULL,
    recomputed_at INTEGER NOT NULL
);
"#;

/// Job records. The partial unique index is the single-flight guard: at most
/// one pending/processing job per kind can exist.
pub const JOBS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    progress_json TEXT,
    error TEXT,
    stop_requested INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_kind_created ON jobs(kind, created_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_single_flight
    ON jobs(kind) WHERE status IN ('pending', 'processing');
"#;

/// One counter per budget day per call kind.
pub const QUOTA_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS quota_usage (
    usage_date TEXT NOT NULL,
    kind TEXT NOT NULL,
    units INTEGER NOT NULL DEFAULT 0 CHECK (units >= 0),
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (usage_date, kind)
);
"#;
