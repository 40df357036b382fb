//! Label validation layer
//!
//! Every AI-proposed label passes through [`LabelValidator`] before it may
//! reach a persisted record. The validator is the only component allowed to
//! turn a proposed string into a vocabulary label.

pub mod label_validator;

pub use label_validator::{
    jaccard_similarity, Evidence, LabelDecision, LabelValidator, MatchTier, RejectReason,
};
