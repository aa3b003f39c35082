//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Paths to viewpulse data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// SQLite database file (`data/viewpulse.db`).
    pub database: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            database: root.join("viewpulse.db"),
            root,
        })
    }
}

/// Bounded exponential backoff for whole-batch upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per batch, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_factor: 2.0,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub data_paths: DataPaths,
    /// Quota units available per budget day.
    pub daily_quota_budget: u32,
    /// UTC offset, in minutes, of the upstream's budget-day boundary (Pacific = -480).
    pub quota_reset_offset_minutes: i32,
    /// Maximum item ids per upstream call.
    pub batch_max: usize,
    /// Minimum samples for an envelope day to be emitted.
    pub min_envelope_samples: usize,
    /// Oldest age (inclusive) covered by the envelope.
    pub max_age_days: u32,
    /// Ceiling applied to performance ratios.
    pub score_ceiling: f64,
    pub retry: RetryConfig,
    /// Default staleness threshold for collection runs, in hours.
    pub default_stale_hours: u64,
    /// Default external-call ceiling for collection runs.
    pub default_max_calls: u32,
    /// Base URL of the upstream metadata API.
    pub api_base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl EngineConfig {
    /// Configuration with defaults rooted at `data_dir`.
    pub fn with_defaults(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            data_paths: DataPaths::new(data_dir)?,
            daily_quota_budget: 10_000,
            quota_reset_offset_minutes: -480,
            batch_max: 50,
            min_envelope_samples: 30,
            max_age_days: 365,
            score_ceiling: 100.0,
            retry: RetryConfig::default(),
            default_stale_hours: 24,
            default_max_calls: 100,
            api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            api_key: None,
        })
    }

    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::with_defaults(data_dir)?;

        if let Some(v) = env_parse("VIEWPULSE_DAILY_QUOTA")? {
            config.daily_quota_budget = v;
        }
        if let Some(v) = env_parse("VIEWPULSE_QUOTA_RESET_OFFSET_MINUTES")? {
            config.quota_reset_offset_minutes = v;
        }
        if let Some(v) = env_parse("VIEWPULSE_BATCH_MAX")? {
            config.batch_max = v;
        }
        if let Some(v) = env_parse("VIEWPULSE_MIN_SAMPLES")? {
            config.min_envelope_samples = v;
        }
        if let Some(v) = env_parse("VIEWPULSE_SCORE_CEILING")? {
            config.score_ceiling = v;
        }
        if let Some(v) = env_parse("VIEWPULSE_RETRY_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = env_parse("VIEWPULSE_STALE_HOURS")? {
            config.default_stale_hours = v;
        }
        if let Some(v) = env_parse("VIEWPULSE_MAX_CALLS")? {
            config.default_max_calls = v;
        }
        if let Ok(url) = std::env::var("VIEWPULSE_API_BASE_URL") {
            config.api_base_url = url;
        }
        config.api_key = std::env::var("YOUTUBE_API_KEY").ok().filter(|k| !k.is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_max == 0 || self.batch_max > 50 {
            return Err(Error::Config(format!(
                "batch_max must be within 1..=50, got {}",
                self.batch_max
            )));
        }
        if self.min_envelope_samples == 0 {
            return Err(Error::Config("min_envelope_samples must be positive".into()));
        }
        if self.max_age_days > 365 {
            return Err(Error::Config(format!(
                "max_age_days must be at most 365, got {}",
                self.max_age_days
            )));
        }
        if self.score_ceiling.is_nan() || self.score_ceiling <= 0.0 {
            return Err(Error::Config("score_ceiling must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.quota_reset_offset_minutes.abs() >= 24 * 60 {
            return Err(Error::Config("quota reset offset must be under 24h".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::with_defaults(dir.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.batch_max, 50);
        assert_eq!(config.min_envelope_samples, 30);
        assert!(config.data_paths.database.ends_with("viewpulse.db"));
    }

    #[test]
    fn test_rejects_oversized_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::with_defaults(dir.path()).unwrap();
        config.batch_max = 51;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
