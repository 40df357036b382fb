//! Sync run log
//!
//! Every run is written to `sync_runs` when it starts and again when it ends,
//! so an interrupted run is still visible with its last known phase.

use crate::models::SyncRun;
use crate::utils::retry_transient;
use govsync_common::events::OutcomeCounts;
use govsync_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Save (insert or update) a run row
pub async fn save_run(pool: &SqlitePool, run: &SyncRun, max_lock_wait_ms: u64) -> Result<()> {
    // Prepare all values before acquiring a connection
    let run_id = run.run_id.to_string();
    let mode = run.params.mode.as_str();
    let phase = run.phase.as_str();
    let started_at = run.started_at.to_rfc3339();
    let ended_at = run.ended_at.map(|dt| dt.to_rfc3339());
    let counts = run.counts;

    retry_transient("save sync run", max_lock_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                run_id, mode, phase, observed, dispatched,
                inserted, updated, rejected_duplicate, deferred, skipped,
                validation_drops, started_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                phase = excluded.phase,
                observed = excluded.observed,
                dispatched = excluded.dispatched,
                inserted = excluded.inserted,
                updated = excluded.updated,
                rejected_duplicate = excluded.rejected_duplicate,
                deferred = excluded.deferred,
                skipped = excluded.skipped,
                validation_drops = excluded.validation_drops,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&run_id)
        .bind(mode)
        .bind(phase)
        .bind(run.observed as i64)
        .bind(run.dispatched as i64)
        .bind(counts.inserted as i64)
        .bind(counts.updated as i64)
        .bind(counts.rejected_duplicate as i64)
        .bind(counts.deferred as i64)
        .bind(counts.skipped as i64)
        .bind(counts.validation_drops as i64)
        .bind(&started_at)
        .bind(&ended_at)
        .execute(pool)
        .await
        .map_err(govsync_common::Error::Database)?;

        Ok::<(), govsync_common::Error>(())
    })
    .await
}

/// Logged run as read back from `sync_runs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub mode: String,
    pub phase: String,
    pub observed: i64,
    pub dispatched: i64,
    pub counts: OutcomeCounts,
    pub started_at: String,
    pub ended_at: Option<String>,
}

/// Load one run by id
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<RunRecord>> {
    let row = sqlx::query(
        r#"
        SELECT run_id, mode, phase, observed, dispatched, inserted, updated,
               rejected_duplicate, deferred, skipped, validation_drops,
               started_at, ended_at
        FROM sync_runs
        WHERE run_id = ?
        "#,
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let count = |column: &str| row.get::<i64, _>(column).max(0) as usize;
        RunRecord {
            run_id: row.get("run_id"),
            mode: row.get("mode"),
            phase: row.get("phase"),
            observed: row.get("observed"),
            dispatched: row.get("dispatched"),
            counts: OutcomeCounts {
                inserted: count("inserted"),
                updated: count("updated"),
                rejected_duplicate: count("rejected_duplicate"),
                deferred: count("deferred"),
                skipped: count("skipped"),
                validation_drops: count("validation_drops"),
            },
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunParams;
    use govsync_common::db::init_memory_database;
    use govsync_common::events::SyncPhase;

    #[tokio::test]
    async fn test_save_and_update_run() {
        let pool = init_memory_database().await.unwrap();
        let mut run = SyncRun::new(RunParams::default());
        run.observed = 4;
        save_run(&pool, &run, 1000).await.unwrap();

        let stored = load_run(&pool, run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.phase, "SCANNING");
        assert_eq!(stored.mode, "filtered");
        assert!(stored.ended_at.is_none());

        run.counts.inserted = 3;
        run.counts.deferred = 1;
        run.transition_to(SyncPhase::Completed);
        save_run(&pool, &run, 1000).await.unwrap();

        let stored = load_run(&pool, run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.phase, "COMPLETED");
        assert_eq!(stored.counts.inserted, 3);
        assert_eq!(stored.counts.deferred, 1);
        assert!(stored.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_run_is_none() {
        let pool = init_memory_database().await.unwrap();
        assert!(load_run(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }
}
