//! Store-backed quota ledger.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::types::{CallKind, QuotaStatus};
use viewpulse_core::{EngineConfig, Error, Result};
use viewpulse_store::{SqliteStore, TrackedItem};

/// Daily call budget, keyed by the upstream's budget day.
pub struct QuotaLedger {
    store: Arc<SqliteStore>,
    daily_budget: u32,
    reset_offset: FixedOffset,
    batch_max: usize,
}

impl QuotaLedger {
    pub fn new(store: Arc<SqliteStore>, config: &EngineConfig) -> Result<Self> {
        let reset_offset = FixedOffset::east_opt(config.quota_reset_offset_minutes * 60)
            .ok_or_else(|| {
                Error::Config(format!(
                    "invalid quota reset offset: {} minutes",
                    config.quota_reset_offset_minutes
                ))
            })?;
        Ok(Self {
            store,
            daily_budget: config.daily_quota_budget,
            reset_offset,
            batch_max: config.batch_max.max(1),
        })
    }

    pub fn daily_budget(&self) -> u32 {
        self.daily_budget
    }

    /// Budget day containing `now`, in the upstream's reset timezone.
    pub fn period_date_at(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.reset_offset).date_naive()
    }

    fn period_key(&self, now: DateTime<Utc>) -> String {
        self.period_date_at(now).format("%Y-%m-%d").to_string()
    }

    /// First instant of the budget day after the one containing `now`.
    pub fn next_reset_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next_day = self.period_date_at(now).succ_opt()?;
        let midnight = next_day.and_hms_opt(0, 0, 0)?;
        self.reset_offset
            .from_local_datetime(&midnight)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    // ---------------------------------------------------------------
    // Ledger operations
    // ---------------------------------------------------------------

    /// Record units already spent. Returns the period total afterwards.
    pub fn record_usage(&self, kind: CallKind, units: u32) -> Result<u32> {
        self.record_usage_at(kind, units, Utc::now())
    }

    pub fn record_usage_at(&self, kind: CallKind, units: u32, now: DateTime<Utc>) -> Result<u32> {
        let used = self
            .store
            .add_quota_usage(&self.period_key(now), kind.as_str(), units)?;
        debug!("Quota usage recorded: {} x{} (used {}/{})", kind, units, used, self.daily_budget);
        if used > self.daily_budget {
            warn!(
                "Quota overdrawn for {}: used {} of {}",
                self.period_key(now),
                used,
                self.daily_budget
            );
        }
        Ok(used)
    }

    pub fn used(&self) -> Result<u32> {
        self.used_at(Utc::now())
    }

    pub fn used_at(&self, now: DateTime<Utc>) -> Result<u32> {
        self.store.quota_used(&self.period_key(now))
    }

    pub fn remaining(&self) -> Result<u32> {
        self.remaining_at(Utc::now())
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Result<u32> {
        Ok(self.daily_budget.saturating_sub(self.used_at(now)?))
    }

    /// Whether `estimated_units` more can be spent this period.
    pub fn check_available(&self, estimated_units: u32) -> Result<bool> {
        self.check_available_at(estimated_units, Utc::now())
    }

    pub fn check_available_at(&self, estimated_units: u32, now: DateTime<Utc>) -> Result<bool> {
        let used = self.used_at(now)?;
        Ok(used.saturating_add(estimated_units) <= self.daily_budget)
    }

    /// Atomic check-and-record. Returns false, recording nothing, if the
    /// units would push the period past its budget.
    pub fn try_reserve(&self, kind: CallKind, units: u32) -> Result<bool> {
        self.try_reserve_at(kind, units, Utc::now())
    }

    pub fn try_reserve_at(&self, kind: CallKind, units: u32, now: DateTime<Utc>) -> Result<bool> {
        let reservation = self.store.try_reserve_quota(
            &self.period_key(now),
            kind.as_str(),
            units,
            self.daily_budget,
        )?;
        if reservation.granted {
            debug!(
                "Quota reserved: {} x{} (used {}/{})",
                kind, units, reservation.used, self.daily_budget
            );
        } else {
            info!(
                "Quota reservation refused: {} x{} (used {}/{})",
                kind, units, reservation.used, self.daily_budget
            );
        }
        Ok(reservation.granted)
    }

    /// Cost of refreshing one item: a single statistics call.
    pub fn estimate_cost_for_item(&self, _item: &TrackedItem) -> u32 {
        CallKind::VideosList.unit_cost()
    }

    /// Cost of refreshing `count` items batched at the upstream maximum.
    pub fn estimate_cost_for_items(&self, count: usize) -> u32 {
        let calls = count.div_ceil(self.batch_max);
        (calls as u32).saturating_mul(CallKind::VideosList.unit_cost())
    }

    pub fn status(&self) -> Result<QuotaStatus> {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> Result<QuotaStatus> {
        let period = self.period_key(now);
        let used = self.store.quota_used(&period)?;
        Ok(QuotaStatus {
            by_kind: self.store.quota_usage_by_kind(&period)?,
            period_date: period,
            daily_budget: self.daily_budget,
            used,
            remaining: self.daily_budget.saturating_sub(used),
            resets_at: self
                .next_reset_at(now)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        })
    }
}
