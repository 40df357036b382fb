//! Common error types for govsync

use thiserror::Error;

// SQLite primary result codes (the low byte of an extended code)
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_IOERR: i32 = 10;

/// Common result type for govsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across govsync crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input (malformed key, unparseable date, bad candidate line)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error is SQLite lock contention that a retry may clear
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }

    /// True when storage was temporarily unavailable and a retry may succeed
    ///
    /// Covers lock contention, pool acquisition timeouts, I/O failures and the
    /// SQLITE_BUSY / SQLITE_LOCKED / SQLITE_IOERR result codes (including their
    /// extended variants).
    pub fn is_transient(&self) -> bool {
        if self.is_lock_contention() {
            return true;
        }
        match self {
            Error::Io(_) => true,
            Error::Database(sqlx::Error::PoolTimedOut) | Error::Database(sqlx::Error::Io(_)) => {
                true
            }
            Error::Database(sqlx::Error::Database(db_err)) => db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED | SQLITE_IOERR))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// True when the error is a uniqueness constraint violation
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}
