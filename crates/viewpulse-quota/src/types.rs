//! Quota types.

use serde::Serialize;
use viewpulse_store::QuotaUsage;

/// Upstream call kinds and their fixed unit cost per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallKind {
    #[serde(rename = "videos.list")]
    VideosList,
    #[serde(rename = "channels.list")]
    ChannelsList,
    #[serde(rename = "playlistItems.list")]
    PlaylistItemsList,
    #[serde(rename = "search.list")]
    SearchList,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VideosList => "videos.list",
            Self::ChannelsList => "channels.list",
            Self::PlaylistItemsList => "playlistItems.list",
            Self::SearchList => "search.list",
        }
    }

    /// Units charged per call, regardless of how many ids the call carries.
    pub fn unit_cost(&self) -> u32 {
        match self {
            Self::SearchList => 100,
            _ => 1,
        }
    }
}

impl std::fmt::Display for CallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the current budget period.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    #[serde(rename = "periodDate")]
    pub period_date: String,
    #[serde(rename = "dailyBudget")]
    pub daily_budget: u32,
    pub used: u32,
    pub remaining: u32,
    #[serde(rename = "byKind")]
    pub by_kind: Vec<QuotaUsage>,
    /// RFC 3339 instant at which the next budget period begins.
    #[serde(rename = "resetsAt")]
    pub resets_at: String,
}
