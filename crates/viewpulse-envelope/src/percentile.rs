//! Nearest-rank percentiles over a sorted sample.

use viewpulse_core::{Error, Result};
use viewpulse_store::EnvelopeRow;

/// Envelope percentiles in per-mille, ascending. Integer arithmetic keeps the
/// rank exact (`floor(n * 0.95)` must not drift below an integer boundary).
pub const PERCENTILES_PER_MILLE: [usize; 6] = [100, 250, 500, 750, 900, 950];

/// Value at rank `floor(n * per_mille / 1000)` of an ascending slice.
pub fn nearest_rank(sorted: &[i64], per_mille: usize) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let index = (sorted.len() * per_mille / 1000).min(sorted.len() - 1);
    Some(sorted[index])
}

/// Sort `views` in place and compute one envelope row from it. All six
/// percentiles index the same sorted slice, so they are non-decreasing.
pub fn envelope_row(
    age_days: u32,
    views: &mut [i64],
    min_samples: usize,
    recomputed_at: i64,
) -> Result<EnvelopeRow> {
    if views.is_empty() || views.len() < min_samples {
        return Err(Error::EnvelopeInsufficientData {
            age_days,
            samples: views.len(),
        });
    }
    views.sort_unstable();

    let mut p = [0i64; 6];
    for (slot, per_mille) in p.iter_mut().zip(PERCENTILES_PER_MILLE) {
        *slot = nearest_rank(views, per_mille).unwrap_or_default();
    }

    Ok(EnvelopeRow {
        age_days,
        p10: p[0],
        p25: p[1],
        p50: p[2],
        p75: p[3],
        p90: p[4],
        p95: p[5],
        sample_count: views.len(),
        recomputed_at,
    })
}
