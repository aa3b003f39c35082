//! Progress payloads written by engine-managed runs.

use serde::Serialize;
use viewpulse_envelope::{RebuildReport, RescoreReport};

/// Final payload of an envelope rebuild job.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildJobReport {
    #[serde(flatten)]
    pub rebuild: RebuildReport,
    /// Present once the swapped envelope has been applied to every item.
    pub rescore: Option<RescoreReport>,
}
