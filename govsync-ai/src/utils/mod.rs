//! Utility modules for govsync-ai

pub mod backoff;
pub mod db_retry;

pub use backoff::{Clock, RetryPolicy, RetryState, TokioClock};
pub use db_retry::retry_transient;
