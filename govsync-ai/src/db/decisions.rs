//! Decision persistence
//!
//! [`PersistenceGateway`] is the only writer of `government_decisions`.
//! Records are keyed by `decision_key` (UNIQUE) and written in batches, one
//! transaction per batch.
//!
//! # Outcomes
//! - no row for the key → `Inserted`
//! - row written earlier in this run → `RejectedDuplicate`
//! - row with the same content hash → `RejectedDuplicate` (nothing rewritten)
//! - otherwise → `Updated` (enrichment fields replaced, identity unchanged)
//! - INSERT hitting the UNIQUE constraint → `RejectedDuplicate`
//!
//! Transient storage failures (lock contention, pool timeouts, I/O) abort and
//! retry the whole batch with backoff; when the retry window runs out every
//! record of the batch is `Deferred`. Any other per-record failure defers only
//! that record.

use crate::models::{CandidateOutcome, DeferReason};
use crate::types::{Classification, DecisionKey, EnrichedRecord};
use crate::utils::retry_transient;
use chrono::NaiveDate;
use govsync_common::config::TomlConfig;
use govsync_common::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Separator for label lists stored in a single column
pub const LABEL_SEPARATOR: &str = "; ";

/// Result of a successful upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    RejectedDuplicate,
}

impl From<UpsertOutcome> for CandidateOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Inserted => CandidateOutcome::Inserted,
            UpsertOutcome::Updated => CandidateOutcome::Updated,
            UpsertOutcome::RejectedDuplicate => CandidateOutcome::RejectedDuplicate,
        }
    }
}

/// Gateway settings for one run
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub batch_size: usize,
    pub max_lock_wait_ms: u64,
    pub date_format: String,
    /// Classify outcomes without writing
    pub dry_run: bool,
}

impl GatewaySettings {
    pub fn from_config(config: &TomlConfig, dry_run: bool) -> Self {
        Self {
            batch_size: config.persistence.batch_size.max(1),
            max_lock_wait_ms: config.database.max_lock_wait_ms,
            date_format: config.validation.storage_date_format.clone(),
            dry_run,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default(), false)
    }
}

/// Column values for one record, prepared before touching the database
#[derive(Debug, Clone)]
struct PreparedRecord {
    key: DecisionKey,
    decision_key: String,
    government_number: i64,
    decision_number: i64,
    decision_suffix: Option<String>,
    decision_date: String,
    title: String,
    content: String,
    committee: Option<String>,
    source_url: Option<String>,
    summary: String,
    operativity: Option<String>,
    tags_policy_area: String,
    tags_government_body: String,
    tags_location: String,
    all_tags: String,
    content_hash: String,
}

impl PreparedRecord {
    fn new(record: &EnrichedRecord, date_format: &str) -> Self {
        Self {
            key: record.key,
            decision_key: record.key.to_string(),
            government_number: i64::from(record.key.government),
            decision_number: i64::from(record.key.number),
            decision_suffix: record.key.suffix.map(String::from),
            decision_date: record.date.format(date_format).to_string(),
            title: record.title.clone(),
            content: record.body.clone(),
            committee: record.committee.clone(),
            source_url: record.url.clone(),
            summary: record.summary.clone(),
            operativity: record.classification.map(|c| c.hebrew_label().to_string()),
            tags_policy_area: record.policy_areas.join(LABEL_SEPARATOR),
            tags_government_body: record.government_bodies.join(LABEL_SEPARATOR),
            tags_location: record.locations.join(LABEL_SEPARATOR),
            all_tags: record.all_tags.join(LABEL_SEPARATOR),
            content_hash: content_hash(record),
        }
    }
}

/// SHA-256 over every stored field of a record
pub fn content_hash(record: &EnrichedRecord) -> String {
    const UNIT: &[u8] = b"\x1f";
    let mut hasher = Sha256::new();
    let classification = record.classification.map(|c| c.as_str()).unwrap_or("");
    let date = record.date.to_string();
    let key = record.key.to_string();
    let policy_areas = record.policy_areas.join("\x1e");
    let government_bodies = record.government_bodies.join("\x1e");
    let locations = record.locations.join("\x1e");
    let all_tags = record.all_tags.join("\x1e");
    let fields: [&str; 12] = [
        key.as_str(),
        date.as_str(),
        record.title.as_str(),
        record.body.as_str(),
        record.committee.as_deref().unwrap_or(""),
        record.url.as_deref().unwrap_or(""),
        record.summary.as_str(),
        classification,
        policy_areas.as_str(),
        government_bodies.as_str(),
        locations.as_str(),
        all_tags.as_str(),
    ];
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update(UNIT);
    }
    format!("{:x}", hasher.finalize())
}

/// Existing row summary used to classify an upsert
struct ExistingRow {
    run_id: String,
    content_hash: String,
}

/// Batched, idempotent writer for enriched records
pub struct PersistenceGateway {
    pool: SqlitePool,
    run_id: Uuid,
    settings: GatewaySettings,
    /// Keys persisted (or, in dry runs, classified) during this run
    seen: HashSet<DecisionKey>,
}

impl PersistenceGateway {
    pub fn new(pool: SqlitePool, run_id: Uuid, settings: GatewaySettings) -> Self {
        Self {
            pool,
            run_id,
            settings,
            seen: HashSet::new(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.settings.batch_size
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Upsert a single record
    ///
    /// Errors (including exhausted lock retries) are returned to the caller.
    pub async fn upsert(&mut self, record: &EnrichedRecord) -> Result<UpsertOutcome> {
        let outcomes = self.write(std::slice::from_ref(record)).await?;
        match outcomes.into_iter().next() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(Error::Internal(message)),
            None => Err(Error::Internal("Upsert produced no outcome".to_string())),
        }
    }

    /// Upsert records in batches of `batch_size`; one outcome per input, in order
    pub async fn upsert_batch(&mut self, records: &[EnrichedRecord]) -> Vec<CandidateOutcome> {
        let mut outcomes = Vec::with_capacity(records.len());

        for batch in records.chunks(self.settings.batch_size.max(1)) {
            match self.write(batch).await {
                Ok(results) => {
                    outcomes.extend(results.into_iter().map(|r| match r {
                        Ok(outcome) => outcome.into(),
                        Err(error) => CandidateOutcome::Deferred(DeferReason::Store { error }),
                    }));
                }
                Err(e) if e.is_lock_contention() => {
                    warn!(
                        run_id = %self.run_id,
                        records = batch.len(),
                        "Write batch deferred: database stayed locked"
                    );
                    outcomes.extend(
                        batch
                            .iter()
                            .map(|_| CandidateOutcome::Deferred(DeferReason::StoreContention)),
                    );
                }
                Err(e) => {
                    warn!(
                        run_id = %self.run_id,
                        records = batch.len(),
                        error = %e,
                        "Write batch deferred"
                    );
                    let error = e.to_string();
                    outcomes.extend(batch.iter().map(|_| {
                        CandidateOutcome::Deferred(DeferReason::Store {
                            error: error.clone(),
                        })
                    }));
                }
            }
        }

        outcomes
    }

    /// Write one batch; `Err` only for batch-level failures
    async fn write(
        &mut self,
        batch: &[EnrichedRecord],
    ) -> Result<Vec<std::result::Result<UpsertOutcome, String>>> {
        let prepared: Vec<PreparedRecord> = batch
            .iter()
            .map(|r| PreparedRecord::new(r, &self.settings.date_format))
            .collect();

        let results = if self.settings.dry_run {
            self.classify_batch(&prepared).await?
        } else {
            let seen = &self.seen;
            let pool = &self.pool;
            let run_id = self.run_id.to_string();
            retry_transient("upsert decision batch", self.settings.max_lock_wait_ms, || {
                write_batch(pool, &run_id, seen, &prepared)
            })
            .await?
        };

        for (record, result) in prepared.iter().zip(&results) {
            match result {
                Ok(outcome) => {
                    self.seen.insert(record.key);
                    match outcome {
                        UpsertOutcome::RejectedDuplicate => info!(
                            decision_key = %record.decision_key,
                            run_id = %self.run_id,
                            "Duplicate rejected"
                        ),
                        _ => debug!(
                            decision_key = %record.decision_key,
                            outcome = ?outcome,
                            "Record persisted"
                        ),
                    }
                }
                Err(error) => warn!(
                    decision_key = %record.decision_key,
                    error = %error,
                    "Record write failed"
                ),
            }
        }

        Ok(results)
    }

    /// Dry run: same classification as a real write, read-only
    async fn classify_batch(
        &self,
        prepared: &[PreparedRecord],
    ) -> Result<Vec<std::result::Result<UpsertOutcome, String>>> {
        let mut in_batch: HashSet<DecisionKey> = HashSet::new();
        let mut results = Vec::with_capacity(prepared.len());

        for record in prepared {
            if self.seen.contains(&record.key) || !in_batch.insert(record.key) {
                results.push(Ok(UpsertOutcome::RejectedDuplicate));
                continue;
            }
            let existing = fetch_existing(&self.pool, &record.decision_key).await?;
            let outcome = match existing {
                None => UpsertOutcome::Inserted,
                Some(row) if row.content_hash == record.content_hash => {
                    UpsertOutcome::RejectedDuplicate
                }
                Some(_) => UpsertOutcome::Updated,
            };
            results.push(Ok(outcome));
        }

        Ok(results)
    }
}

async fn fetch_existing<'e, E>(executor: E, decision_key: &str) -> Result<Option<ExistingRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT run_id, content_hash FROM government_decisions WHERE decision_key = ?",
    )
    .bind(decision_key)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|row| ExistingRow {
        run_id: row.get("run_id"),
        content_hash: row.get("content_hash"),
    }))
}

/// One transaction for the whole batch
///
/// A transient failure anywhere (lock contention, pool timeout, I/O) aborts
/// the transaction and is returned as `Err` so the caller can retry the
/// batch. Other failures are per record.
async fn write_batch(
    pool: &SqlitePool,
    run_id: &str,
    seen: &HashSet<DecisionKey>,
    prepared: &[PreparedRecord],
) -> Result<Vec<std::result::Result<UpsertOutcome, String>>> {
    let mut tx = pool.begin().await?;
    let mut results = Vec::with_capacity(prepared.len());

    for record in prepared {
        if seen.contains(&record.key) {
            results.push(Ok(UpsertOutcome::RejectedDuplicate));
            continue;
        }
        match upsert_one(&mut tx, run_id, record).await {
            Ok(outcome) => results.push(Ok(outcome)),
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => results.push(Err(e.to_string())),
        }
    }

    tx.commit().await?;
    Ok(results)
}

async fn upsert_one(
    tx: &mut Transaction<'_, Sqlite>,
    run_id: &str,
    record: &PreparedRecord,
) -> Result<UpsertOutcome> {
    match fetch_existing(&mut **tx, &record.decision_key).await? {
        None => match insert_row(tx, run_id, record).await {
            Ok(()) => Ok(UpsertOutcome::Inserted),
            Err(e) if e.is_unique_violation() => Ok(UpsertOutcome::RejectedDuplicate),
            Err(e) => Err(e),
        },
        Some(row) if row.run_id == run_id || row.content_hash == record.content_hash => {
            Ok(UpsertOutcome::RejectedDuplicate)
        }
        Some(_) => {
            update_row(tx, run_id, record).await?;
            Ok(UpsertOutcome::Updated)
        }
    }
}

async fn insert_row(
    tx: &mut Transaction<'_, Sqlite>,
    run_id: &str,
    record: &PreparedRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO government_decisions (
            decision_key, government_number, decision_number, decision_suffix,
            decision_date, title, content, committee, source_url,
            summary, operativity, tags_policy_area, tags_government_body,
            tags_location, all_tags, content_hash, run_id
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.decision_key)
    .bind(record.government_number)
    .bind(record.decision_number)
    .bind(&record.decision_suffix)
    .bind(&record.decision_date)
    .bind(&record.title)
    .bind(&record.content)
    .bind(&record.committee)
    .bind(&record.source_url)
    .bind(&record.summary)
    .bind(&record.operativity)
    .bind(&record.tags_policy_area)
    .bind(&record.tags_government_body)
    .bind(&record.tags_location)
    .bind(&record.all_tags)
    .bind(&record.content_hash)
    .bind(run_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Replace enrichment and source fields; identity columns never change
async fn update_row(
    tx: &mut Transaction<'_, Sqlite>,
    run_id: &str,
    record: &PreparedRecord,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE government_decisions SET
            decision_date = ?,
            title = ?,
            content = ?,
            committee = ?,
            source_url = ?,
            summary = ?,
            operativity = ?,
            tags_policy_area = ?,
            tags_government_body = ?,
            tags_location = ?,
            all_tags = ?,
            content_hash = ?,
            run_id = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE decision_key = ?
        "#,
    )
    .bind(&record.decision_date)
    .bind(&record.title)
    .bind(&record.content)
    .bind(&record.committee)
    .bind(&record.source_url)
    .bind(&record.summary)
    .bind(&record.operativity)
    .bind(&record.tags_policy_area)
    .bind(&record.tags_government_body)
    .bind(&record.tags_location)
    .bind(&record.all_tags)
    .bind(&record.content_hash)
    .bind(run_id)
    .bind(&record.decision_key)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ============================================================================
// Read side
// ============================================================================

/// Stored row as read back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDecision {
    pub record: EnrichedRecord,
    pub content_hash: String,
    pub run_id: String,
}

fn split_labels(column: &str) -> Vec<String> {
    column
        .split(LABEL_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load one decision by key
pub async fn load_decision(
    pool: &SqlitePool,
    key: &DecisionKey,
    date_format: &str,
) -> Result<Option<StoredDecision>> {
    let row = sqlx::query(
        r#"
        SELECT decision_key, decision_date, title, content, committee, source_url,
               summary, operativity, tags_policy_area, tags_government_body,
               tags_location, all_tags, content_hash, run_id
        FROM government_decisions
        WHERE decision_key = ?
        "#,
    )
    .bind(key.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let decision_key: String = row.get("decision_key");
    let decision_date: String = row.get("decision_date");
    let date = NaiveDate::parse_from_str(&decision_date, date_format).map_err(|e| {
        Error::Internal(format!(
            "Stored date '{}' for {} is unreadable: {}",
            decision_date, decision_key, e
        ))
    })?;
    let operativity: Option<String> = row.get("operativity");

    let record = EnrichedRecord {
        key: decision_key.parse()?,
        date,
        title: row.get("title"),
        body: row.get("content"),
        committee: row.get("committee"),
        url: row.get("source_url"),
        summary: row.get("summary"),
        classification: operativity.as_deref().and_then(Classification::parse),
        policy_areas: split_labels(row.get::<&str, _>("tags_policy_area")),
        government_bodies: split_labels(row.get::<&str, _>("tags_government_body")),
        locations: split_labels(row.get::<&str, _>("tags_location")),
        all_tags: split_labels(row.get::<&str, _>("all_tags")),
    };

    Ok(Some(StoredDecision {
        record,
        content_hash: row.get("content_hash"),
        run_id: row.get("run_id"),
    }))
}

/// Number of stored decisions
pub async fn count_decisions(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM government_decisions")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
