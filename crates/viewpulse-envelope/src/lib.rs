//! Envelope builder and performance scorer.
//!
//! The envelope is the per-age percentile curve of view counts across every
//! tracked item; the scorer divides an item's current views by the curve's
//! median at the item's age.

pub mod builder;
pub mod curve;
pub mod percentile;
pub mod scorer;

pub use builder::{EnvelopeBuilder, RebuildReport};
pub use curve::Envelope;
pub use scorer::{PerformanceScorer, RescoreReport, ScoreResult};
