//! SQLite-backed store for the performance-normalization engine.
//!
//! A single connection behind a mutex serves every caller in the process.
//! Multi-statement writes (snapshot upsert, envelope swap, quota reservation)
//! run inside one transaction each so readers never observe half a write.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::schema::{ENVELOPE_SCHEMA_SQL, ITEMS_SCHEMA_SQL, JOBS_SCHEMA_SQL, QUOTA_SCHEMA_SQL};
use crate::types::*;
use viewpulse_core::time::{age_in_days, now_millis, utc_date_string};
use viewpulse_core::{Error, Result};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open or create the store at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Database(e.to_string()))?;
        }

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        info!(
            "SqliteStore initialized: {} tracked items, {} snapshots, path={}",
            store.count_tracked_items()?,
            store.count_snapshots()?,
            store.db_path.display()
        );
        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!(
            "{}\n{}\n{}\n{}",
            ITEMS_SCHEMA_SQL, ENVELOPE_SCHEMA_SQL, JOBS_SCHEMA_SQL, QUOTA_SCHEMA_SQL
        );
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Tracked items
    // ---------------------------------------------------------------

    /// Insert an item, or refresh its descriptive fields if already tracked.
    /// Cached counts and scores are never reset here, and the publish time
    /// of an existing item is kept: its snapshot ages were derived from it.
    pub fn upsert_tracked_item(&self, item: &NewTrackedItem) -> Result<()> {
        let now = now_millis();
        let conn = self.conn.lock();
        let stored_published: i64 = conn
            .prepare_cached(
                "INSERT INTO tracked_items (id, title, channel_id, published_at, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET \
                    title = COALESCE(excluded.title, title), \
                    channel_id = COALESCE(excluded.channel_id, channel_id), \
                    updated_at = ?5 \
                 RETURNING published_at",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(
                params![item.id, item.title, item.channel_id, item.published_at, now],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if stored_published != item.published_at {
            warn!(
                "Item {} already tracked with publish time {}; ignoring {}",
                item.id, stored_published, item.published_at
            );
        }
        Ok(())
    }

    pub fn get_tracked_item(&self, item_id: &str) -> Result<Option<TrackedItem>> {
        let conn = self.conn.lock();
        let item = conn
            .prepare_cached("SELECT * FROM tracked_items WHERE id = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![item_id], Self::row_to_item)
            .optional()
            .map_err(|e| Error::Database(e.to_string()));
        item
    }

    pub fn count_tracked_items(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM tracked_items", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Ids of every tracked item, in a stable order.
    pub fn all_tracked_item_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT id FROM tracked_items ORDER BY id")
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Items whose latest snapshot is older than `cutoff` (or missing),
    /// never-snapshotted first, then oldest capture, then oldest publish.
    pub fn stale_items(&self, cutoff: i64, limit: usize) -> Result<Vec<TrackedItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM tracked_items \
                 WHERE last_snapshot_at IS NULL OR last_snapshot_at < ?1 \
                 ORDER BY last_snapshot_at IS NOT NULL, last_snapshot_at ASC, \
                          published_at ASC, id ASC \
                 LIMIT ?2",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![cutoff, limit as i64], Self::row_to_item)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub fn update_item_score(&self, item_id: &str, update: &ItemScoreUpdate) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .prepare_cached(
                "UPDATE tracked_items SET temporal_performance_score = ?1, baseline_views = ?2, \
                 score_age_days = ?3, score_envelope_age = ?4, scored_at = ?5 WHERE id = ?6",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .execute(params![
                update.score,
                update.baseline_views,
                update.age_days,
                update.envelope_age,
                update.scored_at,
                item_id
            ])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Drop a cached score (used when no envelope data exists at all).
    pub fn clear_item_score(&self, item_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE tracked_items SET temporal_performance_score = NULL, baseline_views = NULL, \
                 score_age_days = NULL, score_envelope_age = NULL, scored_at = NULL WHERE id = ?1",
                params![item_id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Highest cached scores first.
    pub fn top_scored_items(&self, limit: usize, min_score: f64) -> Result<Vec<TrackedItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM tracked_items \
                 WHERE temporal_performance_score IS NOT NULL \
                   AND temporal_performance_score >= ?1 \
                 ORDER BY temporal_performance_score DESC, id ASC LIMIT ?2",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![min_score, limit as i64], Self::row_to_item)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ---------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------

    /// Upsert the snapshot for the item's age at `captured_at` and refresh the
    /// item's cached counts, in one transaction.
    pub fn record_snapshot(
        &self,
        item_id: &str,
        captured_at: i64,
        counts: ItemCounts,
    ) -> Result<Snapshot> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(e.to_string()))?;

        let published_at: i64 = tx
            .query_row(
                "SELECT published_at FROM tracked_items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("tracked item {}", item_id)))?;

        let snapshot = Snapshot {
            item_id: item_id.to_string(),
            age_days: age_in_days(published_at, captured_at),
            captured_at,
            capture_date: utc_date_string(captured_at),
            view_count: counts.view_count,
            like_count: counts.like_count,
            comment_count: counts.comment_count,
        };

        tx.execute(
            "INSERT INTO snapshots (item_id, age_days, captured_at, capture_date, \
             view_count, like_count, comment_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(item_id, age_days) DO UPDATE SET \
                captured_at = excluded.captured_at, \
                capture_date = excluded.capture_date, \
                view_count = excluded.view_count, \
                like_count = excluded.like_count, \
                comment_count = excluded.comment_count",
            params![
                snapshot.item_id,
                snapshot.age_days,
                snapshot.captured_at,
                snapshot.capture_date,
                snapshot.view_count,
                snapshot.like_count,
                snapshot.comment_count
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tx.execute(
            "UPDATE tracked_items SET view_count = ?1, like_count = ?2, comment_count = ?3, \
             last_snapshot_at = MAX(COALESCE(last_snapshot_at, 0), ?4), updated_at = ?4 \
             WHERE id = ?5",
            params![
                counts.view_count,
                counts.like_count,
                counts.comment_count,
                captured_at,
                item_id
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        Ok(snapshot)
    }

    pub fn get_snapshots_for_item(&self, item_id: &str) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM snapshots WHERE item_id = ?1 ORDER BY age_days")
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![item_id], Self::row_to_snapshot)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub fn count_snapshots(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Every snapshot view count recorded at exactly `age_days`, ascending.
    pub fn snapshot_views_at_age(&self, age_days: u32) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT view_count FROM snapshots WHERE age_days = ?1 ORDER BY view_count ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![age_days], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<i64>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ---------------------------------------------------------------
    // Envelope
    // ---------------------------------------------------------------

    /// Replace the whole envelope table with `rows` in a single transaction.
    pub fn replace_envelope(&self, rows: &[EnvelopeRow]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(e.to_string()))?;

        tx.execute("DELETE FROM envelope", [])
            .map_err(|e| Error::Database(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO envelope (age_days, p10, p25, p50, p75, p90, p95, \
                     sample_count, recomputed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(|e| Error::Database(e.to_string()))?;
            for row in rows {
                stmt.execute(params![
                    row.age_days,
                    row.p10,
                    row.p25,
                    row.p50,
                    row.p75,
                    row.p90,
                    row.p95,
                    row.sample_count as i64,
                    row.recomputed_at
                ])
                .map_err(|e| Error::Database(e.to_string()))?;
            }
        }
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        debug!("Envelope replaced with {} rows", rows.len());
        Ok(())
    }

    /// The full envelope, ordered by age.
    pub fn get_envelope(&self) -> Result<Vec<EnvelopeRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM envelope ORDER BY age_days")
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::row_to_envelope)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ---------------------------------------------------------------
    // Jobs
    // ---------------------------------------------------------------

    /// Insert a pending job. The partial unique index refuses a second active
    /// job of the same kind, which surfaces as `ConcurrentRunRejected`.
    pub fn insert_job(&self, id: &str, kind: &str, now: i64) -> Result<JobRecord> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO jobs (id, kind, status, created_at, updated_at) \
             VALUES (?1, ?2, 'pending', ?3, ?3)",
        )
        .map_err(|e| Error::Database(e.to_string()))?
        .execute(params![id, kind, now])
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == ErrorCode::ConstraintViolation
                    && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Error::ConcurrentRunRejected(kind.to_string())
            }
            other => Error::Database(other.to_string()),
        })?;

        Ok(JobRecord {
            id: id.to_string(),
            kind: kind.to_string(),
            status: JobStatus::Pending,
            progress: None,
            error: None,
            stop_requested: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Move a job to `to` if its current status is one of `from`.
    /// Returns false (and writes nothing) when the guard does not match.
    pub fn transition_job(
        &self,
        id: &str,
        from: &[JobStatus],
        to: JobStatus,
        progress: Option<&serde_json::Value>,
        error: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        let progress_json = progress.map(serde_json::to_string).transpose()?;
        let from_list = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE jobs SET status = ?1, progress_json = COALESCE(?2, progress_json), \
             error = COALESCE(?3, error), updated_at = ?4 \
             WHERE id = ?5 AND status IN ({})",
            from_list
        );
        let conn = self.conn.lock();
        let count = conn
            .execute(&sql, params![to.as_str(), progress_json, error, now, id])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Overwrite the progress payload of a non-terminal job.
    pub fn update_job_progress(&self, id: &str, progress: &serde_json::Value, now: i64) -> Result<bool> {
        let progress_json = serde_json::to_string(progress)?;
        let conn = self.conn.lock();
        let count = conn
            .prepare_cached(
                "UPDATE jobs SET progress_json = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND status IN ('pending', 'processing')",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .execute(params![progress_json, now, id])
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Raise the stop flag on a non-terminal job.
    pub fn set_job_stop_requested(&self, id: &str, now: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE jobs SET stop_requested = 1, updated_at = ?1 \
                 WHERE id = ?2 AND status IN ('pending', 'processing')",
                params![now, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    pub fn is_job_stop_requested(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let flag: Option<i64> = conn
            .prepare_cached("SELECT stop_requested FROM jobs WHERE id = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![id], |row| row.get(0))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(flag.unwrap_or(0) != 0)
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock();
        let job = conn
            .prepare_cached("SELECT * FROM jobs WHERE id = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![id], Self::row_to_job)
            .optional()
            .map_err(|e| Error::Database(e.to_string()));
        job
    }

    /// Most recently created job of `kind`.
    pub fn latest_job(&self, kind: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock();
        let job = conn
            .prepare_cached(
                "SELECT * FROM jobs WHERE kind = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![kind], Self::row_to_job)
            .optional()
            .map_err(|e| Error::Database(e.to_string()));
        job
    }

    pub fn list_jobs(&self, kind: Option<&str>, limit: usize) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM jobs WHERE ?1 IS NULL OR kind = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![kind, limit as i64], Self::row_to_job)
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Delete terminal jobs of `kind` beyond the `keep` most recent.
    pub fn prune_terminal_jobs(&self, kind: &str, keep: usize) -> Result<usize> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "DELETE FROM jobs WHERE kind = ?1 AND status IN ('completed', 'failed') \
                 AND id NOT IN ( \
                    SELECT id FROM jobs WHERE kind = ?1 AND status IN ('completed', 'failed') \
                    ORDER BY created_at DESC, rowid DESC LIMIT ?2)",
                params![kind, keep as i64],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count)
    }

    // ---------------------------------------------------------------
    // Quota
    // ---------------------------------------------------------------

    /// Total units used on a budget day across all call kinds.
    pub fn quota_used(&self, usage_date: &str) -> Result<u32> {
        let conn = self.conn.lock();
        Self::quota_used_on(&conn, usage_date)
    }

    fn quota_used_on(conn: &Connection, usage_date: &str) -> Result<u32> {
        let used: i64 = conn
            .prepare_cached("SELECT COALESCE(SUM(units), 0) FROM quota_usage WHERE usage_date = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![usage_date], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(used.clamp(0, u32::MAX as i64) as u32)
    }

    pub fn quota_usage_by_kind(&self, usage_date: &str) -> Result<Vec<QuotaUsage>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT usage_date, kind, units FROM quota_usage WHERE usage_date = ?1 ORDER BY kind",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![usage_date], |row| {
                Ok(QuotaUsage {
                    usage_date: row.get(0)?,
                    kind: row.get(1)?,
                    units: row.get(2)?,
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Unconditionally add usage. Returns the day's total afterwards.
    pub fn add_quota_usage(&self, usage_date: &str, kind: &str, units: u32) -> Result<u32> {
        let conn = self.conn.lock();
        Self::add_quota_usage_on(&conn, usage_date, kind, units)?;
        Self::quota_used_on(&conn, usage_date)
    }

    fn add_quota_usage_on(conn: &Connection, usage_date: &str, kind: &str, units: u32) -> Result<()> {
        conn.prepare_cached(
            "INSERT INTO quota_usage (usage_date, kind, units, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(usage_date, kind) DO UPDATE SET \
                units = units + excluded.units, updated_at = excluded.updated_at",
        )
        .map_err(|e| Error::Database(e.to_string()))?
        .execute(params![usage_date, kind, units, now_millis()])
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Check-and-record in one write transaction: usage is added only if the
    /// day's total stays within `budget`.
    pub fn try_reserve_quota(
        &self,
        usage_date: &str,
        kind: &str,
        units: u32,
        budget: u32,
    ) -> Result<QuotaReservation> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(e.to_string()))?;

        let used = Self::quota_used_on(&tx, usage_date)?;
        if used.saturating_add(units) > budget {
            tx.rollback().map_err(|e| Error::Database(e.to_string()))?;
            return Ok(QuotaReservation {
                granted: false,
                used,
            });
        }
        Self::add_quota_usage_on(&tx, usage_date, kind, units)?;
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;

        Ok(QuotaReservation {
            granted: true,
            used: used + units,
        })
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| Error::Database(e.to_string()))
        };
        let tracked_items = count("SELECT COUNT(*) FROM tracked_items")?;
        let scored_items = count(
            "SELECT COUNT(*) FROM tracked_items WHERE temporal_performance_score IS NOT NULL",
        )?;
        let snapshots = count("SELECT COUNT(*) FROM snapshots")?;
        let envelope_rows = count("SELECT COUNT(*) FROM envelope")?;
        let jobs = count("SELECT COUNT(*) FROM jobs")?;
        drop(conn);

        let db_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStats {
            tracked_items,
            scored_items,
            snapshots,
            envelope_rows,
            jobs,
            db_path: self.db_path.to_string_lossy().to_string(),
            db_size_mb: db_size as f64 / (1024.0 * 1024.0),
        })
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrackedItem> {
        Ok(TrackedItem {
            id: row.get("id")?,
            title: row.get("title")?,
            channel_id: row.get("channel_id")?,
            published_at: row.get("published_at")?,
            view_count: row.get("view_count")?,
            like_count: row.get("like_count")?,
            comment_count: row.get("comment_count")?,
            baseline_views: row.get("baseline_views")?,
            temporal_performance_score: row.get("temporal_performance_score")?,
            score_age_days: row.get("score_age_days")?,
            score_envelope_age: row.get("score_envelope_age")?,
            scored_at: row.get("scored_at")?,
            last_snapshot_at: row.get("last_snapshot_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
        Ok(Snapshot {
            item_id: row.get("item_id")?,
            age_days: row.get("age_days")?,
            captured_at: row.get("captured_at")?,
            capture_date: row.get("capture_date")?,
            view_count: row.get("view_count")?,
            like_count: row.get("like_count")?,
            comment_count: row.get("comment_count")?,
        })
    }

    fn row_to_envelope(row: &rusqlite::Row<'_>) -> rusqlite::Result<EnvelopeRow> {
        let sample_count: i64 = row.get("sample_count")?;
        Ok(EnvelopeRow {
            age_days: row.get("age_days")?,
            p10: row.get("p10")?,
            p25: row.get("p25")?,
            p50: row.get("p50")?,
            p75: row.get("p75")?,
            p90: row.get("p90")?,
            p95: row.get("p95")?,
            sample_count: sample_count.max(0) as usize,
            recomputed_at: row.get("recomputed_at")?,
        })
    }

    fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
        let raw_status: String = row.get("status")?;
        let status = JobStatus::parse(&raw_status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                row.as_ref().column_index("status").unwrap_or(0),
                rusqlite::types::Type::Text,
                format!("unknown job status {:?}", raw_status).into(),
            )
        })?;
        let stop_requested: i64 = row.get("stop_requested")?;
        Ok(JobRecord {
            id: row.get("id")?,
            kind: row.get("kind")?,
            status,
            progress: row
                .get::<_, Option<String>>("progress_json")?
                .and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
            stop_requested: stop_requested != 0,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
