//! Error types for viewpulse.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The quota budget cannot cover the next call. Runs treat this as a normal stop.
    #[error("Quota exhausted: requested {requested} units, {remaining} remaining")]
    QuotaExhausted { requested: u32, remaining: u32 },

    /// A single item inside an otherwise successful batch could not be read.
    #[error("Item {item_id} fetch failed: {reason}")]
    ItemFetch { item_id: String, reason: String },

    /// A whole batch failed after every retry attempt was spent.
    #[error("Batch transport failed after {attempts} attempts: {message}")]
    BatchTransport { attempts: u32, message: String },

    #[error("A {0} run is already active")]
    ConcurrentRunRejected(String),

    #[error("Invalid job transition for {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("Insufficient envelope data at age {age_days}: {samples} samples")]
    EnvelopeInsufficientData { age_days: u32, samples: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
