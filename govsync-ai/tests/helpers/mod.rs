//! Test Helper Utilities
//!
//! Shared utilities for govsync-ai integration tests

#![allow(dead_code)]

pub mod fixtures;
pub mod scripted;

// Re-export commonly used items
pub use fixtures::{
    build_engine, candidate, response, test_config, test_processor, test_store, TEST_VOCABULARY,
};
pub use scripted::{RecordingClock, ScriptedProvider, StatementOnFirstCall};
