//! Per-candidate outcomes and the run summary

use crate::types::{DecisionKey, SyncOrder};
use govsync_common::events::{OutcomeCounts, SyncPhase};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a candidate did not reach the store this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferReason {
    /// AI retries exhausted or the request was refused
    Enrichment { attempts: u32, error: String },
    /// Write batch kept hitting lock contention
    StoreContention,
    /// Any other store failure for this record
    Store { error: String },
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::Enrichment { attempts, error } => {
                write!(f, "enrichment failed after {} attempt(s): {}", attempts, error)
            }
            DeferReason::StoreContention => write!(f, "store locked"),
            DeferReason::Store { error } => write!(f, "store error: {}", error),
        }
    }
}

/// Terminal outcome of one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Inserted,
    Updated,
    RejectedDuplicate,
    Deferred(DeferReason),
    /// Already processed in an earlier run
    Skipped,
}

impl CandidateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateOutcome::Inserted => "inserted",
            CandidateOutcome::Updated => "updated",
            CandidateOutcome::RejectedDuplicate => "rejected_duplicate",
            CandidateOutcome::Deferred(_) => "deferred",
            CandidateOutcome::Skipped => "skipped",
        }
    }

    /// The record's identity is present in the store after this outcome
    pub fn is_persisted(&self) -> bool {
        matches!(
            self,
            CandidateOutcome::Inserted
                | CandidateOutcome::Updated
                | CandidateOutcome::RejectedDuplicate
        )
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, CandidateOutcome::Deferred(_))
    }
}

impl fmt::Display for CandidateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one candidate, with its validation drop count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub key: DecisionKey,
    pub order: SyncOrder,
    pub outcome: CandidateOutcome,
    pub validation_drops: usize,
}

/// End-of-run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub phase: SyncPhase,
    pub dry_run: bool,
    pub observed: usize,
    pub dispatched: usize,
    pub counts: OutcomeCounts,
    pub baseline_before: Option<DecisionKey>,
    pub baseline_after: Option<DecisionKey>,
    pub results: Vec<CandidateResult>,
}

impl RunSummary {
    pub fn baseline_advanced(&self) -> bool {
        self.baseline_after != self.baseline_before
    }

    /// Results deferred to a later run
    pub fn deferred(&self) -> impl Iterator<Item = &CandidateResult> {
        self.results.iter().filter(|r| r.outcome.is_deferred())
    }
}

/// Tally outcomes into run counters
pub fn tally<'a>(results: impl IntoIterator<Item = &'a CandidateResult>) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();
    for result in results {
        match result.outcome {
            CandidateOutcome::Inserted => counts.inserted += 1,
            CandidateOutcome::Updated => counts.updated += 1,
            CandidateOutcome::RejectedDuplicate => counts.rejected_duplicate += 1,
            CandidateOutcome::Deferred(_) => counts.deferred += 1,
            CandidateOutcome::Skipped => counts.skipped += 1,
        }
        counts.validation_drops += result.validation_drops;
    }
    counts
}
