//! Data models for govsync-ai
//!
//! - Sync run state machine and run parameters
//! - Per-candidate outcomes and the run summary

pub mod outcome;
pub mod sync_run;

pub use outcome::{tally, CandidateOutcome, CandidateResult, DeferReason, RunSummary};
pub use sync_run::{PhaseTransition, RunMode, RunParams, SyncRun, TargetSelector};
