//! Sync run state machine
//!
//! A run progresses SCANNING → PROCESSING → ADVANCING → COMPLETED, or ends in
//! ABORTED when cancelled between dispatch batches.

use chrono::{DateTime, Utc};
use govsync_common::events::{OutcomeCounts, SyncPhase};
use govsync_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Candidate filtering mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Skip candidates older than `baseline.year - lookback_years`
    #[default]
    Filtered,
    /// Consider every candidate the collector observed
    Unfiltered,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Filtered => "filtered",
            RunMode::Unfiltered => "unfiltered",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "filtered" => Ok(RunMode::Filtered),
            "unfiltered" => Ok(RunMode::Unfiltered),
            other => Err(Error::InvalidInput(format!("Unknown run mode '{}'", other))),
        }
    }
}

/// Restricts a run to specific decisions
///
/// Targeted runs force-include their matches and never move the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    pub government: Option<u32>,
    pub decision: Option<u32>,
}

impl TargetSelector {
    pub fn is_targeted(&self) -> bool {
        self.government.is_some() || self.decision.is_some()
    }

    pub fn matches(&self, key: &crate::types::DecisionKey) -> bool {
        self.government.map_or(true, |g| g == key.government)
            && self.decision.map_or(true, |d| d == key.number)
    }
}

/// Per-run parameters (CLI surface)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    pub mode: RunMode,
    /// Keep at most this many dispatchable candidates (the oldest)
    pub max_candidates: Option<usize>,
    pub target: TargetSelector,
    /// Classify outcomes without writing records or moving the baseline
    pub dry_run: bool,
}

/// Phase change record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub run_id: Uuid,
    pub old_phase: SyncPhase,
    pub new_phase: SyncPhase,
    pub transitioned_at: DateTime<Utc>,
}

/// In-memory state of one sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub phase: SyncPhase,
    pub params: RunParams,
    /// Candidates handed over by the collector
    pub observed: usize,
    /// Candidates sent through enrichment
    pub dispatched: usize,
    pub counts: OutcomeCounts,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn new(params: RunParams) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phase: SyncPhase::Scanning,
            params,
            observed: 0,
            dispatched: 0,
            counts: OutcomeCounts::default(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to `new_phase`; terminal phases stamp `ended_at`
    pub fn transition_to(&mut self, new_phase: SyncPhase) -> PhaseTransition {
        let transition = PhaseTransition {
            run_id: self.run_id,
            old_phase: self.phase,
            new_phase,
            transitioned_at: Utc::now(),
        };
        self.phase = new_phase;
        if new_phase.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }
        transition
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
