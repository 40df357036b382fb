//! Test fixtures: vocabulary, candidates, AI responses and engine wiring

use chrono::NaiveDate;
use govsync_ai::services::{
    EngineSettings, EnrichmentProvider, IncrementalSyncEngine, RecordPostProcessor,
};
use govsync_ai::types::{AiResponse, CandidateItem, DecisionKey};
use govsync_ai::validators::LabelValidator;
use govsync_ai::vocabulary::VocabularyStore;
use govsync_common::config::TomlConfig;
use govsync_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::scripted::RecordingClock;

pub const TEST_VOCABULARY: &str = r#"
    [vocabularies.policy_areas]
    version = "test"
    labels = ["בריאות", "חינוך", "ביטחון", "כלכלה ותקציב"]
    [vocabularies.policy_areas.exclusions]
    "חינוך" = ["הכשרה מקצועית"]
    [vocabularies.policy_areas.thresholds]
    "ביטחון" = 0.8

    [vocabularies.government_bodies]
    version = "test"
    labels = ["משרד הבריאות", "ועדת השרים לענייני חקיקה", "משרד האוצר", "משרד החינוך"]

    [vocabularies.locations]
    version = "test"
    labels = ["ישראל", "ירושלים", "חיפה"]

    [post_processing.denylist]
    locations = ["ישראל"]

    [post_processing.committee_aliases]
    "ועדת שרים לחקיקה" = "ועדת השרים לענייני חקיקה"
"#;

pub fn test_store() -> Arc<VocabularyStore> {
    Arc::new(VocabularyStore::from_toml_str(TEST_VOCABULARY, 0.5).unwrap())
}

/// Defaults with small batches and millisecond backoff
pub fn test_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.sync.concurrency = 3;
    config.sync.dispatch_batch_size = 4;
    config.sync.max_attempts = 3;
    config.sync.initial_delay_ms = 10;
    config.sync.max_delay_ms = 40;
    config.persistence.batch_size = 2;
    config.database.max_lock_wait_ms = 200;
    config.post_processing.truncation_min_chars = 30;
    config
}

pub fn test_processor(config: &TomlConfig) -> Arc<RecordPostProcessor> {
    Arc::new(
        RecordPostProcessor::new(LabelValidator::new(test_store()), &config.post_processing)
            .unwrap(),
    )
}

/// Engine over `pool` with the given provider and a recording clock
pub fn build_engine(
    pool: &SqlitePool,
    provider: Arc<dyn EnrichmentProvider>,
    config: &TomlConfig,
) -> (IncrementalSyncEngine, EventBus, Arc<RecordingClock>) {
    let event_bus = EventBus::new(1024);
    let clock = Arc::new(RecordingClock::default());
    let engine = IncrementalSyncEngine::new(
        pool.clone(),
        provider,
        test_processor(config),
        event_bus.clone(),
        EngineSettings::from_config(config),
    )
    .with_clock(clock.clone());
    (engine, event_bus, clock)
}

/// Candidate of government 37 dated `2024-month-day`
pub fn candidate(number: u32, month: u32, day: u32) -> CandidateItem {
    CandidateItem {
        key: DecisionKey::new(37, number),
        date: NaiveDate::from_ymd_opt(2024, month, day).unwrap(),
        title: format!("תכנית לחיזוק מערך הבריאות {}", number),
        body: "הממשלה מחליטה להקצות תקציב לחיזוק בתי החולים בירושלים.".to_string(),
        committee: None,
        url: Some(format!("https://www.gov.il/he/departments/policies/dec{}-2024", number)),
    }
}

/// Well-formed AI response with authorized labels
pub fn response(summary: &str) -> AiResponse {
    AiResponse {
        summary: summary.to_string(),
        classification: "operative".to_string(),
        policy_areas: vec!["בריאות".to_string()],
        government_bodies: vec!["משרד הבריאות".to_string()],
        locations: vec!["ירושלים".to_string()],
    }
}
