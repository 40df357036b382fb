//! Pipeline services
//!
//! - Candidate intake from the collector's export
//! - AI enrichment client (HTTP, rate limited)
//! - Deterministic post-processing of enriched records
//! - The incremental sync engine that ties them together

pub mod candidate_source;
pub mod enrichment_client;
pub mod operativity_rules;
pub mod record_post_processor;
pub mod summary_repair;
pub mod sync_engine;

pub use candidate_source::{load_candidates, parse_candidates, RawCandidate};
pub use enrichment_client::{
    EnrichmentProvider, EnrichmentRequest, HttpEnrichmentClient, PromptBuilder,
};
pub use operativity_rules::{OperativityRules, OverrideRule};
pub use record_post_processor::{
    union_labels, DropReason, FieldDrop, Fixup, ProcessedRecord, ProcessingReport,
    RecordPostProcessor,
};
pub use summary_repair::{IdentityStripper, TruncationRepair};
pub use sync_engine::{
    classify_candidate, next_baseline, plan_candidates, EngineSettings, IncrementalSyncEngine,
    ScanDecision, ScanPlan,
};
