//! Epoch-millisecond helpers shared by every crate.

use chrono::{DateTime, TimeZone, Utc};

pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Whole days between publish and capture, floored. Captures before the
/// publish instant clamp to day 0.
pub fn age_in_days(published_at: i64, captured_at: i64) -> u32 {
    let delta = captured_at - published_at;
    if delta <= 0 {
        return 0;
    }
    (delta / MILLIS_PER_DAY).min(u32::MAX as i64) as u32
}

pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

pub fn millis_to_rfc3339(millis: i64) -> String {
    millis_to_datetime(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Calendar date (UTC) of an epoch-millisecond instant, `YYYY-MM-DD`.
pub fn utc_date_string(millis: i64) -> String {
    millis_to_datetime(millis)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
