//! Database initialization
//!
//! Opens (or creates) the SQLite store and applies the schema. Every
//! statement is `CREATE ... IF NOT EXISTS`, so initialization is safe to run
//! on every start.

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Open the database file, creating it and its parent directory if needed
pub async fn init_database(db_path: &Path, config: &DatabaseConfig) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets readers proceed while the gateway holds a write transaction.
    // Both settings go on the connect options so every pooled connection gets them.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;

    info!("Database busy timeout set to {} ms", config.busy_timeout_ms);

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// One connection only: every pooled connection to `sqlite::memory:` would
/// otherwise see its own empty database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_decisions_table(pool).await?;
    create_sync_baseline_table(pool).await?;
    create_sync_runs_table(pool).await?;
    Ok(())
}

async fn create_decisions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS government_decisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            decision_key TEXT NOT NULL UNIQUE,
            government_number INTEGER NOT NULL,
            decision_number INTEGER NOT NULL,
            decision_suffix TEXT,
            decision_date TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            committee TEXT,
            source_url TEXT,
            summary TEXT NOT NULL DEFAULT '',
            operativity TEXT,
            tags_policy_area TEXT NOT NULL DEFAULT '',
            tags_government_body TEXT NOT NULL DEFAULT '',
            tags_location TEXT NOT NULL DEFAULT '',
            all_tags TEXT NOT NULL DEFAULT '',
            content_hash TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_decisions_date_number
        ON government_decisions (decision_date, decision_number)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sync_baseline_table(pool: &SqlitePool) -> Result<()> {
    // Single-row table: the CHECK pins the only legal id
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_baseline (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            decision_key TEXT NOT NULL,
            decision_date TEXT NOT NULL,
            run_id TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sync_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            run_id TEXT PRIMARY KEY,
            mode TEXT NOT NULL,
            phase TEXT NOT NULL,
            observed INTEGER NOT NULL DEFAULT 0,
            dispatched INTEGER NOT NULL DEFAULT 0,
            inserted INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            rejected_duplicate INTEGER NOT NULL DEFAULT 0,
            deferred INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            validation_drops INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
