//! Scripted collaborators: AI provider and clock

use async_trait::async_trait;
use govsync_ai::error::EnrichmentError;
use govsync_ai::services::{EnrichmentProvider, EnrichmentRequest};
use govsync_ai::types::{AiResponse, DecisionKey};
use govsync_ai::utils::Clock;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::fixtures::response;

/// Provider answering from per-decision scripts
///
/// Each call pops the next scripted result for the decision; once a script is
/// exhausted (or absent) the provider answers with a default valid response.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<DecisionKey, VecDeque<Result<AiResponse, EnrichmentError>>>>,
    calls: Mutex<HashMap<DecisionKey, u32>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results for one decision
    pub fn script(
        self,
        key: DecisionKey,
        results: impl IntoIterator<Item = Result<AiResponse, EnrichmentError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .extend(results);
        self
    }

    /// Same response for every call about `key`
    pub fn always(self, key: DecisionKey, result: Result<AiResponse, EnrichmentError>) -> Self {
        self.script(key, std::iter::repeat(result).take(64))
    }

    pub fn calls_for(&self, key: DecisionKey) -> u32 {
        self.calls.lock().unwrap().get(&key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl EnrichmentProvider for ScriptedProvider {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<AiResponse, EnrichmentError> {
        let key = request.candidate.key;
        *self.calls.lock().unwrap().entry(key).or_default() += 1;

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);

        next.unwrap_or_else(|| {
            Ok(response(&format!(
                "הממשלה מחליטה לחזק את מערך הבריאות בהחלטה {}.",
                key.number
            )))
        })
    }
}

/// Provider that runs one SQL statement against the store before its first
/// answer, then delegates to a [`ScriptedProvider`]
///
/// Used to break the store while a run is in flight.
pub struct StatementOnFirstCall {
    inner: ScriptedProvider,
    pool: SqlitePool,
    sql: &'static str,
    fired: AtomicBool,
}

impl StatementOnFirstCall {
    pub fn new(pool: &SqlitePool, sql: &'static str) -> Self {
        Self {
            inner: ScriptedProvider::new(),
            pool: pool.clone(),
            sql,
            fired: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for StatementOnFirstCall {
    async fn enrich(&self, request: &EnrichmentRequest) -> Result<AiResponse, EnrichmentError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            sqlx::query(self.sql).execute(&self.pool).await.unwrap();
        }
        self.inner.enrich(request).await
    }
}

/// Clock that records requested sleeps and returns at once
#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
