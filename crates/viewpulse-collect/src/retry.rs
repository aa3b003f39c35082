use std::time::Duration;

use rand::Rng;
use viewpulse_core::RetryConfig;

/// Delay before retry number `attempt` (1-based), with ±10% jitter.
pub fn backoff(retry: &RetryConfig, attempt: u32) -> Duration {
    let exp = retry.backoff_factor.powi(attempt.saturating_sub(1) as i32);
    let base = (retry.initial_backoff_ms as f64 * exp) as u64;
    let jitter = rand::rng().random_range(0.9..1.1);
    Duration::from_millis((base as f64 * jitter) as u64)
}
