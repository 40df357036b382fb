//! govsync-ai - Government decision sync pipeline
//!
//! Loads decision candidates exported by the collector, enriches them through
//! the AI provider, validates every label against the closed vocabularies and
//! persists the results incrementally from the stored baseline.

use anyhow::{Context, Result};
use clap::Parser;
use govsync_ai::db::count_decisions;
use govsync_ai::models::{RunMode, RunParams, RunSummary, TargetSelector};
use govsync_ai::services::{
    load_candidates, EngineSettings, HttpEnrichmentClient, IncrementalSyncEngine,
    RecordPostProcessor,
};
use govsync_ai::validators::LabelValidator;
use govsync_ai::vocabulary::VocabularyStore;
use govsync_common::config::{load_config, resolve_config_path, LoggingConfig};
use govsync_common::db::init_database;
use govsync_common::events::{EventBus, PipelineEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "govsync-ai", version, about = "Incremental government decision sync")]
struct Args {
    /// Config file (falls back to GOVSYNC_CONFIG, then the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root folder holding the database and vocabulary file
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Candidate file exported by the collector (JSON array or JSON lines)
    #[arg(long, short)]
    input: PathBuf,

    /// Dispatch at most this many candidates (the oldest first)
    #[arg(long)]
    max_candidates: Option<usize>,

    /// Only process decisions of this government
    #[arg(long)]
    government: Option<u32>,

    /// Only process this decision number
    #[arg(long)]
    decision: Option<u32>,

    /// `filtered` limits scanning to the lookback window, `unfiltered` scans everything
    #[arg(long, default_value = "filtered")]
    mode: RunMode,

    /// Report outcomes without writing records or moving the baseline
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = load_config(config_path.as_deref())?;
    init_tracing(&config.logging)?;

    info!("Starting govsync-ai v{}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder and its files
    let root_folder = config.resolve_root_folder(args.root_folder.as_deref());
    let db_path = config.database_path(&root_folder);
    let vocabulary_path = config.vocabulary_path(&root_folder);
    info!("Root folder: {}", root_folder.display());

    // Step 2: Vocabularies (fatal on any problem)
    let store = Arc::new(
        VocabularyStore::from_path(&vocabulary_path, config.validation.similarity_threshold)
            .with_context(|| format!("Load vocabularies from {}", vocabulary_path.display()))?,
    );

    // Step 3: Database
    let pool = init_database(&db_path, &config.database).await?;
    info!("Database: {} ({} stored decisions)", db_path.display(), count_decisions(&pool).await?);

    // Step 4: Candidates
    let candidates = load_candidates(&args.input, &config.validation)?;
    info!("Loaded {} candidates from {}", candidates.len(), args.input.display());

    // Step 5: Pipeline components
    let api_key = config
        .resolve_ai_api_key()
        .context("No AI API key configured (set GOVSYNC_AI_API_KEY or [ai].api_key)")?;
    let provider = Arc::new(HttpEnrichmentClient::new(&config.ai, api_key, &store)?);
    let processor = Arc::new(RecordPostProcessor::new(
        LabelValidator::new(Arc::clone(&store)),
        &config.post_processing,
    )?);

    let event_bus = EventBus::new(256);
    spawn_event_logger(&event_bus);

    let engine = IncrementalSyncEngine::new(
        pool.clone(),
        provider,
        processor,
        event_bus,
        EngineSettings::from_config(&config),
    );

    // Ctrl-C stops dispatch at the next batch boundary
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current batch");
            cancel_on_signal.cancel();
        }
    });

    let params = RunParams {
        mode: args.mode,
        max_candidates: args.max_candidates,
        target: TargetSelector {
            government: args.government,
            decision: args.decision,
        },
        dry_run: args.dry_run,
    };

    let summary = engine.run(candidates, params, cancel).await?;
    print_summary(&summary);

    pool.close().await;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("govsync_ai=info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

/// Mirror pipeline events into the debug log
fn spawn_event_logger(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let PipelineEvent::CandidateCompleted {
                decision_key,
                outcome,
                ..
            } = &event
            {
                debug!(decision_key = %decision_key, outcome = %outcome, "Candidate completed");
            }
        }
    });
}

fn print_summary(summary: &RunSummary) {
    let counts = &summary.counts;
    println!("Run {} finished: {}", summary.run_id, summary.phase.as_str());
    if summary.dry_run {
        println!("  (dry run: nothing was written)");
    }
    println!("  observed:           {}", summary.observed);
    println!("  dispatched:         {}", summary.dispatched);
    println!("  inserted:           {}", counts.inserted);
    println!("  updated:            {}", counts.updated);
    println!("  rejected duplicate: {}", counts.rejected_duplicate);
    println!("  deferred:           {}", counts.deferred);
    println!("  skipped:            {}", counts.skipped);
    println!("  validation drops:   {}", counts.validation_drops);
    match (&summary.baseline_before, &summary.baseline_after) {
        (before, Some(after)) if summary.baseline_advanced() => println!(
            "  baseline:           {} -> {}",
            before.map_or_else(|| "none".to_string(), |b| b.to_string()),
            after
        ),
        (_, Some(current)) => println!("  baseline:           {} (unchanged)", current),
        (_, None) => println!("  baseline:           none"),
    }
    for deferred in summary.deferred() {
        println!("  deferred {}: {}", deferred.key, deferred.outcome);
    }
}
