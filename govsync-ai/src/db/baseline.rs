//! Sync baseline persistence
//!
//! Single-row table holding the most recent fully processed decision. The
//! baseline only ever moves forward in sync order.

use crate::types::{DecisionKey, SyncOrder};
use crate::utils::retry_transient;
use chrono::NaiveDate;
use govsync_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const BASELINE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Most recent fully processed decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncBaseline {
    pub key: DecisionKey,
    pub date: NaiveDate,
}

impl SyncBaseline {
    pub fn new(key: DecisionKey, date: NaiveDate) -> Self {
        Self { key, date }
    }

    pub fn order(&self) -> SyncOrder {
        (self.date, self.key.number, self.key.suffix)
    }
}

/// Read the current baseline (`None` before the first completed run)
pub async fn load_baseline(pool: &SqlitePool) -> Result<Option<SyncBaseline>> {
    let row = sqlx::query("SELECT decision_key, decision_date FROM sync_baseline WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(baseline_from_row).transpose()
}

/// Move the baseline to `candidate` if it lies strictly after the stored one
///
/// Read-compare-write happens in one transaction, so a concurrent writer can
/// never move the baseline backwards.
pub async fn advance_baseline(
    pool: &SqlitePool,
    candidate: SyncBaseline,
    run_id: Uuid,
    max_lock_wait_ms: u64,
) -> Result<AdvanceResult> {
    let run_id = run_id.to_string();
    retry_transient("advance baseline", max_lock_wait_ms, || {
        advance_in_transaction(pool, candidate, &run_id)
    })
    .await
}

async fn advance_in_transaction(
    pool: &SqlitePool,
    candidate: SyncBaseline,
    run_id: &str,
) -> Result<AdvanceResult> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query("SELECT decision_key, decision_date FROM sync_baseline WHERE id = 1")
        .fetch_optional(&mut *tx)
        .await?;

    let previous = match current {
        Some(row) => {
            let prev = baseline_from_row(&row)?;
            if candidate.order() <= prev.order() {
                tx.rollback().await?;
                return Ok(AdvanceResult::Unchanged { current: prev });
            }
            Some(prev)
        }
        None => None,
    };

    sqlx::query(
        r#"
        INSERT INTO sync_baseline (id, decision_key, decision_date, run_id, updated_at)
        VALUES (1, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(id) DO UPDATE SET
            decision_key = excluded.decision_key,
            decision_date = excluded.decision_date,
            run_id = excluded.run_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(candidate.key.to_string())
    .bind(candidate.date.format(BASELINE_DATE_FORMAT).to_string())
    .bind(run_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(AdvanceResult::Advanced { previous })
}

fn baseline_from_row(row: &SqliteRow) -> Result<SyncBaseline> {
    let key: String = row.get("decision_key");
    let date: String = row.get("decision_date");
    let date = NaiveDate::parse_from_str(&date, BASELINE_DATE_FORMAT)
        .map_err(|e| Error::Internal(format!("Stored baseline date '{}' is unreadable: {}", date, e)))?;
    Ok(SyncBaseline {
        key: key.parse()?,
        date,
    })
}

/// Outcome of [`advance_baseline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceResult {
    Advanced { previous: Option<SyncBaseline> },
    /// Stored baseline is already at or after the candidate
    Unchanged { current: SyncBaseline },
}
