//! Database access for govsync-ai
//!
//! Schema creation lives in `govsync_common::db`; this module holds the
//! queries the pipeline runs against it.

pub mod baseline;
pub mod decisions;
pub mod runs;

pub use baseline::{advance_baseline, load_baseline, AdvanceResult, SyncBaseline};
pub use decisions::{
    content_hash, count_decisions, load_decision, GatewaySettings, PersistenceGateway,
    StoredDecision, UpsertOutcome,
};
pub use runs::{load_run, save_run, RunRecord};
