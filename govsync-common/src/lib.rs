//! # govsync Common Library
//!
//! Shared code for the govsync workspace:
//! - Error type and result alias
//! - TOML configuration loading and path resolution
//! - Database pool initialization and schema
//! - Pipeline status events (EventBus)

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
