//! Job kinds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Snapshot collection against the upstream source.
    Collect,
    /// Full envelope recomputation.
    EnvelopeRebuild,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::EnvelopeRebuild => "envelope_rebuild",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collect" => Some(Self::Collect),
            "envelope_rebuild" | "rebuild" => Some(Self::EnvelopeRebuild),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
