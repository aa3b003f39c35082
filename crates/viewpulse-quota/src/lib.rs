//! Quota ledger — tracks consumption of the shared upstream call budget.
//!
//! Every code path that issues an upstream call consults the ledger first.
//! The ledger only answers questions and records usage; it never sleeps,
//! retries or schedules.

pub mod ledger;
pub mod types;

pub use ledger::QuotaLedger;
pub use types::*;
