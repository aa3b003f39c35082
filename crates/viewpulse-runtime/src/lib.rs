//! Runtime engine — the operation surface a hosting application calls.
//!
//! Collection and envelope rebuilds run as background tasks wrapped in job
//! records; triggers return the job id at once and callers poll for the
//! outcome.

pub mod engine;
pub mod types;

pub use engine::Engine;
pub use types::*;
