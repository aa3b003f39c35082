//! Job supervisor — wraps long-running runs in a durable
//! `pending → processing → {completed, failed}` state machine.
//!
//! Single flight per kind is enforced by the store's unique index, not by a
//! separate read. Stop requests are cooperative: the run polls its handle
//! between units of work. A crash mid-run leaves the job `processing`;
//! nothing here reclaims it.

pub mod supervisor;
pub mod types;

pub use supervisor::{JobHandle, JobSupervisor};
pub use types::JobKind;
pub use viewpulse_store::{JobRecord, JobStatus};
