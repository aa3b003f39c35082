//! In-memory view of one envelope generation.

use std::collections::BTreeMap;

use viewpulse_core::Result;
use viewpulse_store::{EnvelopeRow, SqliteStore};

/// Envelope rows keyed by age. Ages with too few samples are simply absent.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    rows: BTreeMap<u32, EnvelopeRow>,
}

impl Envelope {
    pub fn from_rows(rows: impl IntoIterator<Item = EnvelopeRow>) -> Self {
        Self {
            rows: rows.into_iter().map(|r| (r.age_days, r)).collect(),
        }
    }

    /// Read the current generation. The table is only ever swapped whole,
    /// so this never mixes two rebuilds.
    pub fn load(store: &SqliteStore) -> Result<Self> {
        Ok(Self::from_rows(store.get_envelope()?))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Exact-age row, no fallback.
    pub fn get(&self, age_days: u32) -> Option<&EnvelopeRow> {
        self.rows.get(&age_days)
    }

    /// Row for `age_days`, falling back to the nearest populated age at or
    /// below it, then the nearest above it.
    pub fn lookup(&self, age_days: u32) -> Option<&EnvelopeRow> {
        self.rows
            .range(..=age_days)
            .next_back()
            .or_else(|| self.rows.range(age_days..).next())
            .map(|(_, row)| row)
    }

    pub fn rows(&self) -> impl Iterator<Item = &EnvelopeRow> {
        self.rows.values()
    }
}
