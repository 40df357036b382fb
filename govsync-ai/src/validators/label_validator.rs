//! Label Validator
//!
//! Accepts, maps or rejects each AI-proposed label against its closed
//! vocabulary.
//!
//! # Tiers (short-circuit on first success)
//! 1. **Exact**: normalized label, or its alias, matches a vocabulary entry
//!    (case/diacritic-insensitive) → accepted with confidence 1.0
//! 2. **Similarity**: word-level Jaccard against every entry; the best entry
//!    (ties → shortest entry, then lexical order) is accepted when its score
//!    reaches that entry's threshold (default 0.5)
//! 3. **Rejection**: dropped with reason "no vocabulary match"
//!
//! # Exclusion veto
//! An accepted label that carries exclusion patterns is rejected when the
//! decision text mentions one of those patterns and nothing else in the text
//! mentions the label (or one of its aliases).
//!
//! # Guarantee
//! `AcceptedAs` always carries a canonical label of the target vocabulary.
//!
//! # Example
//! ```rust,ignore
//! let validator = LabelValidator::new(store.clone());
//! match validator.validate(LabelField::GovernmentBodies, "משרד הבריאות ", None) {
//!     LabelDecision::AcceptedAs { label, .. } => assert_eq!(label, "משרד הבריאות"),
//!     LabelDecision::Rejected { reason } => println!("dropped: {}", reason),
//! }
//! ```

use crate::normalize::{fold_for_match, normalize_text, token_set};
use crate::types::LabelField;
use crate::vocabulary::{Vocabulary, VocabularyStore};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Tier that accepted a label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Similarity,
}

/// Why a proposed label was dropped
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Label was blank after normalization
    Empty,
    /// No entry matched exactly or reached its similarity threshold
    NoVocabularyMatch { best_score: f64 },
    /// The only supporting text was an exclusion pattern of the label
    Excluded { label: String, pattern: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "empty label"),
            RejectReason::NoVocabularyMatch { best_score } => {
                write!(f, "no vocabulary match (best similarity {:.2})", best_score)
            }
            RejectReason::Excluded { label, pattern } => {
                write!(f, "'{}' only supported by excluded phrase '{}'", label, pattern)
            }
        }
    }
}

/// Outcome for one proposed label
#[derive(Debug, Clone, PartialEq)]
pub enum LabelDecision {
    AcceptedAs {
        label: String,
        tier: MatchTier,
        confidence: f64,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl LabelDecision {
    /// Canonical label when accepted
    pub fn accepted_label(&self) -> Option<&str> {
        match self {
            LabelDecision::AcceptedAs { label, .. } => Some(label),
            LabelDecision::Rejected { .. } => None,
        }
    }
}

/// Decision text used to evaluate exclusion patterns
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    folded: String,
}

impl Evidence {
    /// Fold and join every text part that may mention a label
    pub fn new(parts: &[&str]) -> Self {
        let folded = parts
            .iter()
            .map(|part| fold_for_match(part))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Self { folded }
    }

    pub fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }
}

/// Token-set (word-level) Jaccard similarity
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Three-tier label validator over an injected vocabulary store
#[derive(Debug, Clone)]
pub struct LabelValidator {
    store: Arc<VocabularyStore>,
}

impl LabelValidator {
    pub fn new(store: Arc<VocabularyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &VocabularyStore {
        &self.store
    }

    /// Validate one proposed label for `field`
    pub fn validate(
        &self,
        field: LabelField,
        proposed: &str,
        evidence: Option<&Evidence>,
    ) -> LabelDecision {
        let vocabulary = self.store.get(field);
        let normalized = normalize_text(proposed);
        if normalized.is_empty() {
            return LabelDecision::Rejected {
                reason: RejectReason::Empty,
            };
        }

        let decision = match vocabulary.canonicalize(&normalized) {
            Some(canonical) => LabelDecision::AcceptedAs {
                label: canonical.to_string(),
                tier: MatchTier::Exact,
                confidence: 1.0,
            },
            None => self.similarity_tier(vocabulary, &normalized),
        };

        let decision = match decision {
            LabelDecision::AcceptedAs { ref label, .. } => {
                match excluded_by(vocabulary, label, evidence) {
                    Some(pattern) => LabelDecision::Rejected {
                        reason: RejectReason::Excluded {
                            label: label.clone(),
                            pattern,
                        },
                    },
                    None => decision,
                }
            }
            rejected => rejected,
        };

        if let LabelDecision::Rejected { reason } = &decision {
            debug!(
                field = %field,
                label = %normalized,
                reason = %reason,
                "Label rejected"
            );
        }

        decision
    }

    /// Validate a list of proposed labels, preserving input order
    pub fn validate_all(
        &self,
        field: LabelField,
        proposed: &[String],
        evidence: Option<&Evidence>,
    ) -> Vec<(String, LabelDecision)> {
        proposed
            .iter()
            .map(|label| (label.clone(), self.validate(field, label, evidence)))
            .collect()
    }

    fn similarity_tier(&self, vocabulary: &Vocabulary, normalized: &str) -> LabelDecision {
        let proposed_tokens = token_set(normalized);
        let mut best: Option<(&str, f64)> = None;

        for (entry, entry_tokens) in vocabulary.entries() {
            let score = jaccard_similarity(&proposed_tokens, entry_tokens);
            if score <= 0.0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_entry, best_score)) => {
                    score > best_score
                        || (score == best_score && prefer_entry(entry, best_entry))
                }
            };
            if better {
                best = Some((entry, score));
            }
        }

        match best {
            Some((entry, score)) if score >= vocabulary.threshold_for(entry) => {
                LabelDecision::AcceptedAs {
                    label: entry.to_string(),
                    tier: MatchTier::Similarity,
                    confidence: score,
                }
            }
            other => LabelDecision::Rejected {
                reason: RejectReason::NoVocabularyMatch {
                    best_score: other.map(|(_, score)| score).unwrap_or(0.0),
                },
            },
        }
    }
}

/// Tie-break: shorter entry wins, then lexical order for determinism
fn prefer_entry(candidate: &str, current: &str) -> bool {
    let (a, b) = (candidate.chars().count(), current.chars().count());
    a < b || (a == b && candidate < current)
}

/// Exclusion pattern that is the only evidence for `label`, if any
fn excluded_by(vocabulary: &Vocabulary, label: &str, evidence: Option<&Evidence>) -> Option<String> {
    let patterns = vocabulary.exclusions_for(label);
    if patterns.is_empty() {
        return None;
    }
    let evidence = evidence.filter(|e| !e.is_empty())?;

    let matched = patterns
        .iter()
        .find(|pattern| evidence.folded.contains(pattern.as_str()))?;

    let mut remaining = evidence.folded.clone();
    for pattern in patterns {
        remaining = remaining.replace(pattern.as_str(), " ");
    }

    let supported = vocabulary
        .surface_forms(label)
        .iter()
        .any(|form| remaining.contains(form.as_str()));

    if supported {
        None
    } else {
        Some(matched.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOCAB: &str = r#"
        [vocabularies.policy_areas]
        labels = ["בריאות", "חינוך", "תעסוקה", "ביטחון לאומי", "ביטחון"]
        [vocabularies.policy_areas.exclusions]
        "חינוך" = ["הכשרה מקצועית"]
        [vocabularies.policy_areas.thresholds]
        "ביטחון לאומי" = 0.9

        [vocabularies.government_bodies]
        labels = [
            "משרד הבריאות",
            "משרד החינוך",
            "ועדת השרים לענייני חקיקה",
            "משרד התקשורת",
        ]
        [vocabularies.government_bodies.aliases]
        "משרד הבריאות והרווחה" = "משרד הבריאות"

        [vocabularies.locations]
        labels = ["ירושלים", "תל אביב יפו"]
    "#;

    fn validator() -> LabelValidator {
        let store = VocabularyStore::from_toml_str(VOCAB, 0.5).unwrap();
        LabelValidator::new(Arc::new(store))
    }

    fn tokens(text: &str) -> HashSet<String> {
        token_set(text)
    }

    #[test]
    fn test_exact_tier_after_normalization() {
        let decision = validator().validate(LabelField::GovernmentBodies, "משרד הבריאות ", None);
        assert_eq!(
            decision,
            LabelDecision::AcceptedAs {
                label: "משרד הבריאות".to_string(),
                tier: MatchTier::Exact,
                confidence: 1.0,
            }
        );
    }

    #[test]
    fn test_exact_tier_via_alias() {
        let decision =
            validator().validate(LabelField::GovernmentBodies, "משרד הבריאות והרווחה", None);
        assert_eq!(decision.accepted_label(), Some("משרד הבריאות"));
    }

    #[test]
    fn test_similarity_tier_canonicalizes() {
        let decision = validator().validate(
            LabelField::GovernmentBodies,
            "ועדת שרים לענייני חקיקה ותחיקה",
            None,
        );
        match decision {
            LabelDecision::AcceptedAs {
                label,
                tier,
                confidence,
            } => {
                assert_eq!(label, "ועדת השרים לענייני חקיקה");
                assert_eq!(tier, MatchTier::Similarity);
                assert!(confidence >= 0.5);
            }
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_label_rejected() {
        let decision =
            validator().validate(LabelField::GovernmentBodies, "משרד הדיגיטל הלאומי", None);
        assert!(matches!(
            decision,
            LabelDecision::Rejected {
                reason: RejectReason::NoVocabularyMatch { .. }
            }
        ));
    }

    #[test]
    fn test_blank_label_rejected_as_empty() {
        let decision = validator().validate(LabelField::Locations, " \u{200F} ", None);
        assert_eq!(
            decision,
            LabelDecision::Rejected {
                reason: RejectReason::Empty
            }
        );
    }

    #[test]
    fn test_highest_score_wins() {
        // {ביטחון, אזרחי} vs {ביטחון} = 1/2, vs {ביטחון, לאומי} = 1/3
        let decision = validator().validate(LabelField::PolicyAreas, "ביטחון אזרחי", None);
        assert_eq!(decision.accepted_label(), Some("ביטחון"));
    }

    #[test]
    fn test_tie_break_prefers_shorter_then_lexical() {
        assert!(prefer_entry("ביטחון", "ביטחון לאומי"));
        assert!(!prefer_entry("ביטחון לאומי", "ביטחון"));
        assert!(prefer_entry("אבג", "אבד"));
        assert!(!prefer_entry("אבד", "אבג"));
    }

    #[test]
    fn test_per_label_threshold_raises_bar() {
        // {ביטחון, לאומי, ופנים} vs {ביטחון, לאומי} = 2/3 < 0.9
        let decision = validator().validate(LabelField::PolicyAreas, "ביטחון לאומי ופנים", None);
        assert!(matches!(decision, LabelDecision::Rejected { .. }));
    }

    #[test]
    fn test_exclusion_is_only_evidence() {
        let validator = validator();
        let evidence = Evidence::new(&["תכנית הכשרה מקצועית לעובדים בפריפריה"]);
        let decision = validator.validate(LabelField::PolicyAreas, "חינוך", Some(&evidence));
        assert!(matches!(
            decision,
            LabelDecision::Rejected {
                reason: RejectReason::Excluded { .. }
            }
        ));
    }

    #[test]
    fn test_exclusion_with_other_support_is_accepted() {
        let validator = validator();
        let evidence = Evidence::new(&["תכנית חינוך והכשרה מקצועית לבני נוער"]);
        let decision = validator.validate(LabelField::PolicyAreas, "חינוך", Some(&evidence));
        assert_eq!(decision.accepted_label(), Some("חינוך"));
    }

    #[test]
    fn test_exclusion_without_evidence_does_not_veto() {
        let decision = validator().validate(LabelField::PolicyAreas, "חינוך", None);
        assert_eq!(decision.accepted_label(), Some("חינוך"));
    }

    #[test]
    fn test_accepted_labels_always_authorized() {
        let validator = validator();
        let proposals = [
            "משרד הבריאות",
            "משרד  החינוך ",
            "משרד",
            "משרד הבריאות והחינוך",
            "ועדת השרים",
            "השרים לענייני חקיקה",
            "רשות המסים",
            "משרד התקשורת והדיגיטל",
            "",
        ];
        for field in LabelField::ALL {
            let vocabulary = validator.store().get(field);
            for proposal in proposals {
                if let Some(label) = validator.validate(field, proposal, None).accepted_label() {
                    assert!(
                        vocabulary.labels().iter().any(|l| l == label),
                        "'{}' accepted as '{}' which is not in {}",
                        proposal,
                        label,
                        field
                    );
                }
            }
        }
    }

    #[test]
    fn test_validate_all_preserves_order() {
        let results = validator().validate_all(
            LabelField::Locations,
            &["תל אביב יפו".to_string(), "חיפה".to_string(), "ירושלים".to_string()],
            None,
        );
        let accepted: Vec<Option<&str>> = results.iter().map(|(_, d)| d.accepted_label()).collect();
        assert_eq!(accepted, vec![Some("תל אביב יפו"), None, Some("ירושלים")]);
    }

    #[test]
    fn test_jaccard_similarity() {
        assert_eq!(jaccard_similarity(&tokens("a b"), &tokens("a b")), 1.0);
        assert_eq!(jaccard_similarity(&tokens("a b c d"), &tokens("a b")), 0.5);
        assert_eq!(jaccard_similarity(&tokens(""), &tokens("")), 0.0);
        assert_eq!(
            jaccard_similarity(
                &tokens("ועדת שרים לענייני חקיקה ותחיקה"),
                &tokens("ועדת השרים לענייני חקיקה")
            ),
            0.5
        );
    }
}
