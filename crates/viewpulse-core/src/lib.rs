//! viewpulse core — error taxonomy, engine configuration, data directories.

pub mod config;
pub mod error;
pub mod time;

pub use config::{DataPaths, EngineConfig, RetryConfig};
pub use error::{Error, Result};
