//! Snapshot collector: refreshes stale items from the upstream metadata
//! source under the quota ledger's budget.

pub mod collector;
pub mod retry;
pub mod upstream;

pub use collector::{CollectParams, CollectReport, SnapshotCollector, StopReason};
pub use upstream::{BatchFetch, FetchError, MetadataSource, YouTubeDataSource};
