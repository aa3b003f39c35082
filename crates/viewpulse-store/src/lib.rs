//! viewpulse store — SQLite tables for tracked items, snapshots, the
//! percentile envelope, job records and quota counters.

pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::SqliteStore;
pub use types::*;
