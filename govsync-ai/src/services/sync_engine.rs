//! Incremental sync engine
//!
//! Drives one sync run through SCANNING → PROCESSING → ADVANCING →
//! COMPLETED (or ABORTED on cancellation).
//!
//! # Scanning
//! Each observed candidate is compared with the stored baseline:
//! - strictly before the baseline → already processed, skipped
//! - equal to the baseline → reprocessed
//! - after the baseline → new
//!
//! Filtered runs also drop candidates whose year is earlier than
//! `baseline.year - lookback_years`. Targeted runs (government and/or
//! decision number) consider only matching candidates and force-include
//! them. Dispatch order is ascending sync order; `max_candidates` keeps the
//! oldest.
//!
//! # Processing
//! Candidates are dispatched in batches. Within a batch, AI calls run on a
//! bounded worker pool (`buffer_unordered`); each worker retries with
//! exponential backoff, then post-processes its record inline. Completed
//! records go to the persistence gateway in write batches. Cancellation is
//! checked before every dispatch batch.
//!
//! # Advancing
//! Once every dispatched candidate has a terminal outcome, the baseline moves
//! to the greatest persisted candidate that precedes every deferred one.
//! Aborted, targeted and dry runs never move it.
//!
//! Failures writing the run log or the baseline are logged and the run still
//! returns its summary; stored records are never rolled back.

use crate::db::{self, AdvanceResult, GatewaySettings, PersistenceGateway, SyncBaseline};
use crate::error::EnrichmentError;
use crate::models::{
    tally, CandidateOutcome, CandidateResult, DeferReason, RunMode, RunParams, RunSummary, SyncRun,
};
use crate::services::enrichment_client::{EnrichmentProvider, EnrichmentRequest};
use crate::services::record_post_processor::{ProcessedRecord, RecordPostProcessor};
use crate::types::{AiResponse, CandidateItem, EnrichedRecord};
use crate::utils::{Clock, RetryPolicy, RetryState, TokioClock};
use chrono::{Datelike, Utc};
use futures::stream::{self, StreamExt};
use govsync_common::config::TomlConfig;
use govsync_common::events::{EventBus, PipelineEvent, SyncPhase};
use govsync_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Scanning
// ============================================================================

/// How a candidate relates to the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDecision {
    New,
    Reprocess,
    AlreadyProcessed,
}

/// Classify one candidate against the baseline
pub fn classify_candidate(
    candidate: &CandidateItem,
    baseline: Option<&SyncBaseline>,
    forced: bool,
) -> ScanDecision {
    let Some(baseline) = baseline else {
        return ScanDecision::New;
    };
    let order = candidate.sync_order();
    let base = baseline.order();
    if order > base {
        ScanDecision::New
    } else if order == base || forced {
        ScanDecision::Reprocess
    } else {
        ScanDecision::AlreadyProcessed
    }
}

/// Candidates selected for dispatch plus those skipped
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    /// Ascending sync order, truncated to `max_candidates`
    pub dispatch: Vec<CandidateItem>,
    pub skipped: Vec<CandidateItem>,
    /// Dispatchable candidates left for a later run by `max_candidates`
    pub deferred_by_limit: usize,
}

/// Build the dispatch plan for a run
pub fn plan_candidates(
    candidates: Vec<CandidateItem>,
    baseline: Option<&SyncBaseline>,
    params: &RunParams,
    lookback_years: i32,
) -> ScanPlan {
    let targeted = params.target.is_targeted();
    let min_year = match (params.mode, baseline) {
        (RunMode::Filtered, Some(baseline)) if !targeted => Some(baseline.date.year() - lookback_years),
        _ => None,
    };

    let mut plan = ScanPlan::default();
    for candidate in candidates {
        if targeted && !params.target.matches(&candidate.key) {
            continue;
        }
        if min_year.is_some_and(|year| candidate.date.year() < year) {
            plan.skipped.push(candidate);
            continue;
        }
        match classify_candidate(&candidate, baseline, targeted) {
            ScanDecision::AlreadyProcessed => plan.skipped.push(candidate),
            ScanDecision::New | ScanDecision::Reprocess => plan.dispatch.push(candidate),
        }
    }

    // Stable sort keeps collector order for equal keys
    plan.dispatch.sort_by_key(|c| c.sync_order());
    if let Some(limit) = params.max_candidates {
        if plan.dispatch.len() > limit {
            plan.deferred_by_limit = plan.dispatch.len() - limit;
            plan.dispatch.truncate(limit);
        }
    }
    plan
}

/// Baseline target after a run: the greatest persisted candidate that precedes
/// every deferred candidate
pub fn next_baseline(
    results: &[CandidateResult],
    dispatched: &[CandidateItem],
) -> Option<SyncBaseline> {
    let first_deferred = results
        .iter()
        .filter(|r| r.outcome.is_deferred())
        .map(|r| r.order)
        .min();

    let best = results
        .iter()
        .filter(|r| r.outcome.is_persisted())
        .filter(|r| first_deferred.map_or(true, |d| r.order < d))
        .max_by_key(|r| r.order)?;

    dispatched
        .iter()
        .find(|c| c.key == best.key && c.sync_order() == best.order)
        .map(|c| SyncBaseline::new(c.key, c.date))
}

// ============================================================================
// Engine
// ============================================================================

/// Engine settings taken from the TOML config
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub concurrency: usize,
    pub lookback_years: i32,
    pub dispatch_batch_size: usize,
    pub max_lock_wait_ms: u64,
    pub retry: RetryPolicy,
    pub gateway: GatewaySettings,
}

impl EngineSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            concurrency: config.sync.concurrency.max(1),
            lookback_years: config.sync.lookback_years,
            dispatch_batch_size: config.sync.dispatch_batch_size.max(1),
            max_lock_wait_ms: config.database.max_lock_wait_ms,
            retry: RetryPolicy::from_config(&config.sync),
            gateway: GatewaySettings::from_config(config, false),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// Outcome of one worker: a post-processed record or a deferral
type WorkerResult = std::result::Result<ProcessedRecord, DeferReason>;

/// Sync run orchestrator
pub struct IncrementalSyncEngine {
    pool: SqlitePool,
    provider: Arc<dyn EnrichmentProvider>,
    processor: Arc<RecordPostProcessor>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl IncrementalSyncEngine {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn EnrichmentProvider>,
        processor: Arc<RecordPostProcessor>,
        event_bus: EventBus,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            provider,
            processor,
            event_bus,
            clock: Arc::new(TokioClock),
            settings,
        }
    }

    /// Replace the backoff clock (tests)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Execute one sync run over the observed candidates
    pub async fn run(
        &self,
        candidates: Vec<CandidateItem>,
        params: RunParams,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let dry_run = params.dry_run;
        let targeted = params.target.is_targeted();
        let mut run = SyncRun::new(params);
        run.observed = candidates.len();
        let run_id = run.run_id;

        info!(
            run_id = %run_id,
            mode = %run.params.mode,
            observed = run.observed,
            dry_run,
            targeted,
            "Sync run started"
        );
        self.event_bus.emit_lossy(PipelineEvent::RunStarted {
            run_id,
            mode: run.params.mode.to_string(),
            observed: run.observed,
            timestamp: Utc::now(),
        });
        self.log_run(&run).await;

        // SCANNING
        let baseline_before = db::load_baseline(&self.pool).await?;
        let plan = plan_candidates(
            candidates,
            baseline_before.as_ref(),
            &run.params,
            self.settings.lookback_years,
        );
        run.dispatched = plan.dispatch.len();

        let mut results: Vec<CandidateResult> = plan
            .skipped
            .iter()
            .map(|c| CandidateResult {
                key: c.key,
                order: c.sync_order(),
                outcome: CandidateOutcome::Skipped,
                validation_drops: 0,
            })
            .collect();

        info!(
            run_id = %run_id,
            baseline = ?baseline_before.map(|b| b.key.to_string()),
            dispatch = plan.dispatch.len(),
            skipped = plan.skipped.len(),
            left_for_next_run = plan.deferred_by_limit,
            "Scan complete"
        );

        // PROCESSING
        self.transition(&mut run, SyncPhase::Processing);

        let mut gateway = PersistenceGateway::new(
            self.pool.clone(),
            run_id,
            GatewaySettings {
                dry_run,
                ..self.settings.gateway.clone()
            },
        );

        let mut aborted = false;
        for batch in plan.dispatch.chunks(self.settings.dispatch_batch_size) {
            if cancel.is_cancelled() {
                aborted = true;
                break;
            }
            let batch_results = self.process_batch(batch, run_id, &mut gateway).await;
            results.extend(batch_results);
        }

        if aborted {
            info!(
                run_id = %run_id,
                completed = results.len() - plan.skipped.len(),
                dispatched = run.dispatched,
                "Sync run cancelled between batches, baseline untouched"
            );
            return Ok(self
                .finish(run, SyncPhase::Aborted, results, baseline_before, baseline_before)
                .await);
        }

        // ADVANCING
        self.transition(&mut run, SyncPhase::Advancing);
        let mut baseline_after = baseline_before;

        if dry_run || targeted {
            debug!(run_id = %run_id, dry_run, targeted, "Baseline left unchanged");
        } else if let Some(target) = next_baseline(&results, &plan.dispatch) {
            let max_wait = self.settings.max_lock_wait_ms;
            match db::advance_baseline(&self.pool, target, run_id, max_wait).await {
                Ok(AdvanceResult::Advanced { previous }) => {
                    info!(
                        run_id = %run_id,
                        previous = ?previous.map(|b| b.key.to_string()),
                        current = %target.key,
                        "Baseline advanced"
                    );
                    self.event_bus.emit_lossy(PipelineEvent::BaselineAdvanced {
                        run_id,
                        previous: previous.map(|b| b.key.to_string()),
                        current: target.key.to_string(),
                        timestamp: Utc::now(),
                    });
                    baseline_after = Some(target);
                }
                Ok(AdvanceResult::Unchanged { current }) => {
                    debug!(run_id = %run_id, current = %current.key, "Baseline already at or past target");
                    baseline_after = Some(current);
                }
                // Stored records stay; the next run rescans from the old baseline
                Err(e) => warn!(
                    run_id = %run_id,
                    target = %target.key,
                    error = %e,
                    "Baseline not advanced"
                ),
            }
        }

        Ok(self
            .finish(run, SyncPhase::Completed, results, baseline_before, baseline_after)
            .await)
    }

    /// Enrich, post-process and persist one dispatch batch
    async fn process_batch(
        &self,
        batch: &[CandidateItem],
        run_id: Uuid,
        gateway: &mut PersistenceGateway,
    ) -> Vec<CandidateResult> {
        // AI stage: bounded worker pool, completion order
        let mut worked: Vec<(usize, WorkerResult)> = stream::iter(batch.iter().enumerate())
            .map(|(index, candidate)| async move { (index, self.work(candidate, run_id).await) })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        // Persist in dispatch order so duplicate detection is deterministic
        worked.sort_by_key(|(index, _)| *index);

        let mut drops = vec![0usize; batch.len()];
        let mut outcomes: Vec<Option<CandidateOutcome>> = vec![None; batch.len()];
        let mut to_write: Vec<(usize, EnrichedRecord)> = Vec::new();

        for (index, result) in worked {
            match result {
                Ok(processed) => {
                    drops[index] = processed.report.drop_count();
                    to_write.push((index, processed.record));
                }
                Err(reason) => outcomes[index] = Some(CandidateOutcome::Deferred(reason)),
            }
        }

        let (indices, records): (Vec<usize>, Vec<EnrichedRecord>) = to_write.into_iter().unzip();
        let written = gateway.upsert_batch(&records).await;
        for (index, outcome) in indices.into_iter().zip(written) {
            outcomes[index] = Some(outcome);
        }

        batch
            .iter()
            .zip(outcomes)
            .zip(drops)
            .map(|((candidate, outcome), validation_drops)| {
                let outcome = outcome.unwrap_or_else(|| {
                    CandidateOutcome::Deferred(DeferReason::Store {
                        error: "no outcome recorded".to_string(),
                    })
                });
                self.event_bus.emit_lossy(PipelineEvent::CandidateCompleted {
                    run_id,
                    decision_key: candidate.key.to_string(),
                    outcome: outcome.as_str().to_string(),
                    validation_drops,
                    timestamp: Utc::now(),
                });
                if let CandidateOutcome::Deferred(reason) = &outcome {
                    warn!(
                        run_id = %run_id,
                        decision_key = %candidate.key,
                        reason = %reason,
                        "Candidate deferred to a later run"
                    );
                }
                CandidateResult {
                    key: candidate.key,
                    order: candidate.sync_order(),
                    outcome,
                    validation_drops,
                }
            })
            .collect()
    }

    /// One worker: AI call with retries, then inline post-processing
    async fn work(&self, candidate: &CandidateItem, run_id: Uuid) -> WorkerResult {
        let response = self.enrich_with_retry(candidate).await?;
        let processed = self.processor.process_response(candidate, &response);

        for rejection in processed.report.label_rejections() {
            debug!(
                decision_key = %candidate.key,
                field = %rejection.field,
                label = %rejection.value,
                reason = %rejection.reason,
                "Label dropped"
            );
            self.event_bus.emit_lossy(PipelineEvent::LabelRejected {
                run_id,
                decision_key: candidate.key.to_string(),
                field: rejection.field.clone(),
                label: rejection.value.clone(),
                reason: rejection.reason.to_string(),
                timestamp: Utc::now(),
            });
        }

        Ok(processed)
    }

    /// AI call with exponential backoff
    ///
    /// `Rejected` errors defer at once; everything else is retried until the
    /// policy's attempt budget is spent.
    async fn enrich_with_retry(
        &self,
        candidate: &CandidateItem,
    ) -> std::result::Result<AiResponse, DeferReason> {
        let request = EnrichmentRequest::new(candidate.clone());
        let policy = self.settings.retry;
        let mut attempt = 1;

        loop {
            let error: EnrichmentError = match self.provider.enrich(&request).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(decision_key = %candidate.key, attempt, "AI call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => e,
            };

            let state = if error.is_retryable() {
                policy.after_failure(attempt, error.retry_after())
            } else {
                RetryState::Deferred { attempts: attempt }
            };

            match state {
                RetryState::Backoff { delay, .. } => {
                    warn!(
                        decision_key = %candidate.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = error.kind(),
                        error = %error,
                        "AI call failed, backing off"
                    );
                    self.clock.sleep(delay).await;
                    attempt += 1;
                }
                RetryState::Attempting(next) => attempt = next.max(attempt + 1),
                RetryState::Deferred { attempts } => {
                    warn!(
                        decision_key = %candidate.key,
                        attempts,
                        error_kind = error.kind(),
                        error = %error,
                        "AI call abandoned"
                    );
                    return Err(DeferReason::Enrichment {
                        attempts,
                        error: error.to_string(),
                    });
                }
            }
        }
    }

    fn transition(&self, run: &mut SyncRun, phase: SyncPhase) {
        let transition = run.transition_to(phase);
        debug!(
            run_id = %run.run_id,
            from = transition.old_phase.as_str(),
            to = transition.new_phase.as_str(),
            "Sync phase changed"
        );
        self.event_bus.emit_lossy(PipelineEvent::PhaseChanged {
            run_id: run.run_id,
            old_phase: transition.old_phase,
            new_phase: transition.new_phase,
            timestamp: transition.transitioned_at,
        });
    }

    async fn finish(
        &self,
        mut run: SyncRun,
        phase: SyncPhase,
        results: Vec<CandidateResult>,
        baseline_before: Option<SyncBaseline>,
        baseline_after: Option<SyncBaseline>,
    ) -> RunSummary {
        run.counts = tally(&results);
        self.transition(&mut run, phase);
        self.log_run(&run).await;

        let counts = run.counts;
        info!(
            run_id = %run.run_id,
            phase = phase.as_str(),
            inserted = counts.inserted,
            updated = counts.updated,
            rejected_duplicate = counts.rejected_duplicate,
            deferred = counts.deferred,
            skipped = counts.skipped,
            validation_drops = counts.validation_drops,
            "Sync run finished"
        );
        self.event_bus.emit_lossy(PipelineEvent::RunCompleted {
            run_id: run.run_id,
            phase,
            counts,
            timestamp: Utc::now(),
        });

        RunSummary {
            run_id: run.run_id,
            phase,
            dry_run: run.params.dry_run,
            observed: run.observed,
            dispatched: run.dispatched,
            counts,
            baseline_before: baseline_before.map(|b| b.key),
            baseline_after: baseline_after.map(|b| b.key),
            results,
        }
    }

    /// Run log write; dry runs leave the store untouched
    ///
    /// A failed write never fails the run: the summary is still returned.
    async fn log_run(&self, run: &SyncRun) {
        if run.params.dry_run {
            return;
        }
        if let Err(e) = db::save_run(&self.pool, run, self.settings.max_lock_wait_ms).await {
            warn!(
                run_id = %run.run_id,
                phase = run.phase.as_str(),
                error = %e,
                "Run log not written"
            );
        }
    }
}
