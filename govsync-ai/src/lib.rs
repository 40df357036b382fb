//! govsync-ai library interface
//!
//! Exposes the sync pipeline for the binary and for integration testing.

pub mod db;
pub mod error;
pub mod models;
pub mod normalize;
pub mod services;
pub mod types;
pub mod utils;
pub mod validators;
pub mod vocabulary;

pub use crate::error::EnrichmentError;
pub use crate::services::IncrementalSyncEngine;
