//! Record post-processing
//!
//! Turns raw AI output into a record that satisfies the store's invariants.
//!
//! # Steps (in order, never fatal)
//! 1. Normalize text fields
//! 2. Validate every label against its vocabulary; drop rejected labels
//! 3. De-duplicate each label set (first occurrence wins)
//! 4. Structural fixups: per-set denylist, committee name remapping
//! 5. Truncated-summary repair
//! 6. Strip a leading restatement of the decision's own number
//! 7. Recompute `all_tags` from the three label sets
//! 8. Deterministic classification overrides
//!
//! Running the processor on its own output changes nothing.

use crate::normalize::{normalize_block, normalize_text};
use crate::services::operativity_rules::{OperativityRules, OverrideRule};
use crate::services::summary_repair::{IdentityStripper, TruncationRepair};
use crate::types::{AiResponse, CandidateItem, Classification, EnrichedRecord, LabelField};
use crate::validators::{Evidence, LabelDecision, LabelValidator, RejectReason};
use govsync_common::config::PostProcessingConfig;
use govsync_common::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Why a field value was dropped
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropReason {
    /// Label validator rejected it
    Validation { detail: String },
    /// Same canonical label appeared earlier in the set
    Duplicate,
    /// Generic label removed by the denylist
    Denylisted,
    /// Classification value was not recognized
    UnrecognizedClassification,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Validation { detail } => f.write_str(detail),
            DropReason::Duplicate => f.write_str("duplicate"),
            DropReason::Denylisted => f.write_str("denylisted"),
            DropReason::UnrecognizedClassification => f.write_str("unrecognized classification"),
        }
    }
}

impl From<&RejectReason> for DropReason {
    fn from(reason: &RejectReason) -> Self {
        DropReason::Validation {
            detail: reason.to_string(),
        }
    }
}

/// One dropped value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDrop {
    pub field: String,
    pub value: String,
    pub reason: DropReason,
}

/// One value-preserving correction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fixup {
    LabelCanonicalized { field: String, from: String, to: String },
    CommitteeRemapped { from: String, to: String },
    SummaryTruncationRepaired,
    IdentityPrefixStripped,
    ClassificationOverridden {
        rule: OverrideRule,
        from: Option<Classification>,
        to: Classification,
    },
}

/// Everything the processor dropped or corrected for one record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingReport {
    pub drops: Vec<FieldDrop>,
    pub fixups: Vec<Fixup>,
}

impl ProcessingReport {
    /// Number of dropped values (the run's validation-drop count)
    pub fn drop_count(&self) -> usize {
        self.drops.len()
    }

    /// Validator rejections only
    pub fn label_rejections(&self) -> impl Iterator<Item = &FieldDrop> {
        self.drops
            .iter()
            .filter(|d| matches!(d.reason, DropReason::Validation { .. }))
    }

    pub fn is_clean(&self) -> bool {
        self.drops.is_empty() && self.fixups.is_empty()
    }

    fn drop(&mut self, field: &str, value: &str, reason: DropReason) {
        self.drops.push(FieldDrop {
            field: field.to_string(),
            value: value.to_string(),
            reason,
        });
    }
}

/// Post-processed record plus its report
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub record: EnrichedRecord,
    pub report: ProcessingReport,
}

/// Stateless post-processor (shared across workers)
#[derive(Debug, Clone)]
pub struct RecordPostProcessor {
    validator: LabelValidator,
    truncation: TruncationRepair,
    identity: IdentityStripper,
    rules: OperativityRules,
}

impl RecordPostProcessor {
    pub fn new(validator: LabelValidator, config: &PostProcessingConfig) -> Result<Self> {
        Ok(Self {
            validator,
            truncation: TruncationRepair::new(config),
            identity: IdentityStripper::new()?,
            rules: OperativityRules::new()?,
        })
    }

    pub fn validator(&self) -> &LabelValidator {
        &self.validator
    }

    /// Build and post-process a record from a candidate and raw AI output
    pub fn process_response(&self, candidate: &CandidateItem, response: &AiResponse) -> ProcessedRecord {
        let mut report = ProcessingReport::default();

        let raw_classification = normalize_text(&response.classification);
        let classification = Classification::parse(&raw_classification);
        if classification.is_none() {
            report.drop(
                "classification",
                &raw_classification,
                DropReason::UnrecognizedClassification,
            );
        }

        let record = EnrichedRecord::draft(candidate, response, classification);
        self.run(record, report)
    }

    /// Post-process an existing record (idempotent)
    pub fn process(&self, record: EnrichedRecord) -> ProcessedRecord {
        self.run(record, ProcessingReport::default())
    }

    fn run(&self, mut record: EnrichedRecord, mut report: ProcessingReport) -> ProcessedRecord {
        // 1. Normalize
        record.title = normalize_text(&record.title);
        record.body = normalize_block(&record.body);
        record.summary = normalize_text(&record.summary);
        record.committee = record
            .committee
            .as_deref()
            .map(normalize_text)
            .filter(|c| !c.is_empty());
        record.url = record
            .url
            .as_deref()
            .map(normalize_text)
            .filter(|u| !u.is_empty());

        let evidence = Evidence::new(&[&record.title, &record.body]);
        let fixups = self.validator.store().fixups();

        for field in LabelField::ALL {
            let proposed = std::mem::take(record.labels_mut(field));
            let mut kept: Vec<String> = Vec::with_capacity(proposed.len());
            let mut seen: HashSet<String> = HashSet::new();

            for raw in proposed {
                // 2. Validate
                let label = match self.validator.validate(field, &raw, Some(&evidence)) {
                    LabelDecision::AcceptedAs { label, .. } => label,
                    LabelDecision::Rejected { reason } => {
                        report.drop(field.as_str(), &normalize_text(&raw), DropReason::from(&reason));
                        continue;
                    }
                };
                if normalize_text(&raw) != label {
                    report.fixups.push(Fixup::LabelCanonicalized {
                        field: field.as_str().to_string(),
                        from: normalize_text(&raw),
                        to: label.clone(),
                    });
                }

                // 3. Dedup
                if !seen.insert(label.clone()) {
                    report.drop(field.as_str(), &label, DropReason::Duplicate);
                    continue;
                }

                // 4. Denylist
                if fixups.is_denied(field, &label) {
                    report.drop(field.as_str(), &label, DropReason::Denylisted);
                    continue;
                }

                kept.push(label);
            }

            *record.labels_mut(field) = kept;
        }

        // 4. Committee remapping
        if let Some(committee) = record.committee.clone() {
            if let Some(canonical) = fixups.canonical_committee(&committee) {
                if canonical != committee {
                    report.fixups.push(Fixup::CommitteeRemapped {
                        from: committee,
                        to: canonical.to_string(),
                    });
                    record.committee = Some(canonical.to_string());
                }
            }
        }

        // 5. Truncation repair; a leading identity restatement is not a
        // sentence to cut back to
        let lead = self.identity.restatement_len(&record.summary, &record.key);
        let (restatement, text) = record.summary.split_at(lead);
        if let Some(repaired) = self.truncation.repair(text) {
            record.summary = format!("{}{}", restatement, repaired);
            report.fixups.push(Fixup::SummaryTruncationRepaired);
        }

        // 6. Identity restatement
        let stripped = self.identity.strip(&record.summary, &record.key);
        if stripped != record.summary {
            record.summary = stripped;
            report.fixups.push(Fixup::IdentityPrefixStripped);
        }

        // 7. Derived labels
        record.all_tags = union_labels(&record);

        // 8. Classification overrides
        if let Some(rule) = self.rules.evaluate(&record.title, &record.body) {
            let to = rule.classification();
            if record.classification != Some(to) {
                report.fixups.push(Fixup::ClassificationOverridden {
                    rule,
                    from: record.classification,
                    to,
                });
                record.classification = Some(to);
            }
        }

        if !report.is_clean() {
            debug!(
                decision_key = %record.key,
                drops = report.drops.len(),
                fixups = report.fixups.len(),
                "Record post-processed with corrections"
            );
        }

        ProcessedRecord { record, report }
    }
}

/// Ordered union of the three label sets (policy areas, bodies, locations)
pub fn union_labels(record: &EnrichedRecord) -> Vec<String> {
    let mut seen = HashSet::new();
    LabelField::ALL
        .iter()
        .flat_map(|field| record.labels(*field).iter())
        .filter(|label| seen.insert(label.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecisionKey;
    use crate::vocabulary::VocabularyStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    const VOCAB: &str = r#"
        [vocabularies.policy_areas]
        labels = ["בריאות", "חינוך", "דיור"]
        [vocabularies.policy_areas.exclusions]
        "חינוך" = ["הכשרה מקצועית"]

        [vocabularies.government_bodies]
        labels = ["משרד הבריאות", "ועדת השרים לענייני חקיקה", "משרד האוצר"]

        [vocabularies.locations]
        labels = ["ירושלים", "ישראל", "חיפה"]

        [post_processing.denylist]
        locations = ["ישראל"]

        [post_processing.committee_aliases]
        "ועדת שרים לחקיקה" = "ועדת השרים לענייני חקיקה"
    "#;

    fn processor() -> RecordPostProcessor {
        let store = Arc::new(VocabularyStore::from_toml_str(VOCAB, 0.5).unwrap());
        let config = PostProcessingConfig {
            truncation_marker: "[...]".to_string(),
            truncation_min_chars: 30,
            truncation_tail_window: 2,
        };
        RecordPostProcessor::new(LabelValidator::new(store), &config).unwrap()
    }

    fn candidate(title: &str, body: &str) -> CandidateItem {
        CandidateItem {
            key: DecisionKey::new(37, 1234),
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            title: title.to_string(),
            body: body.to_string(),
            committee: Some("ועדת שרים לחקיקה".to_string()),
            url: None,
        }
    }

    fn response() -> AiResponse {
        AiResponse {
            summary: "החלטה מספר 1234: הממשלה מחליטה לחזק את מערך הבריאות.".to_string(),
            classification: "operative".to_string(),
            policy_areas: vec!["בריאות".into(), " בריאות".into(), "דיור".into()],
            government_bodies: vec![
                "משרד הבריאות ".into(),
                "ועדת שרים לענייני חקיקה ותחיקה".into(),
                "משרד הדיגיטל הלאומי".into(),
            ],
            locations: vec!["ישראל".into(), "ירושלים".into()],
        }
    }

    #[test]
    fn test_full_pipeline() {
        let processed = processor().process_response(
            &candidate("חיזוק מערך הבריאות", "הממשלה מחליטה לחזק את מערך הבריאות."),
            &response(),
        );
        let record = &processed.record;

        assert_eq!(record.policy_areas, vec!["בריאות", "דיור"]);
        assert_eq!(
            record.government_bodies,
            vec!["משרד הבריאות", "ועדת השרים לענייני חקיקה"]
        );
        assert_eq!(record.locations, vec!["ירושלים"]);
        assert_eq!(
            record.all_tags,
            vec!["בריאות", "דיור", "משרד הבריאות", "ועדת השרים לענייני חקיקה", "ירושלים"]
        );
        assert_eq!(record.summary, "הממשלה מחליטה לחזק את מערך הבריאות.");
        assert_eq!(record.committee.as_deref(), Some("ועדת השרים לענייני חקיקה"));
        assert_eq!(record.classification, Some(Classification::Operative));

        let reasons: Vec<&DropReason> = processed.report.drops.iter().map(|d| &d.reason).collect();
        assert_eq!(processed.report.drop_count(), 3);
        assert!(reasons.contains(&&DropReason::Duplicate));
        assert!(reasons.contains(&&DropReason::Denylisted));
        assert_eq!(processed.report.label_rejections().count(), 1);
    }

    #[test]
    fn test_rejected_label_leaves_other_fields_alone() {
        let mut ai = response();
        ai.government_bodies = vec!["משרד הדיגיטל הלאומי".into()];
        let processed = processor().process_response(
            &candidate("חיזוק מערך הבריאות", "הממשלה מחליטה לחזק את מערך הבריאות."),
            &ai,
        );
        assert!(processed.record.government_bodies.is_empty());
        assert_eq!(processed.record.classification, Some(Classification::Operative));
        assert!(!processed.record.summary.is_empty());
    }

    #[test]
    fn test_appointment_overrides_ai_classification() {
        let processed = processor().process_response(
            &candidate("מינוי מנהל כללי למשרד הבריאות", "הממשלה מחליטה למנות את מר ישראלי."),
            &response(),
        );
        assert_eq!(processed.record.classification, Some(Classification::NonOperative));
        assert!(processed
            .report
            .fixups
            .iter()
            .any(|f| matches!(f, Fixup::ClassificationOverridden { rule: OverrideRule::Appointment, .. })));
    }

    #[test]
    fn test_unrecognized_classification_is_dropped() {
        let mut ai = response();
        ai.classification = "maybe".to_string();
        let processed = processor().process_response(&candidate("כותרת", "גוף ההחלטה."), &ai);
        assert_eq!(processed.record.classification, None);
        assert!(processed
            .report
            .drops
            .iter()
            .any(|d| d.reason == DropReason::UnrecognizedClassification));
    }

    #[test]
    fn test_truncated_summary_repaired() {
        let mut ai = response();
        ai.summary = "הממשלה מחליטה להקצות תקציב לשיקום הצפון. הממשלה מאשרת את התכנית ומבקשת מוועדת הכ".into();
        let processed = processor().process_response(&candidate("כותרת", "גוף."), &ai);
        assert_eq!(processed.record.summary, "הממשלה מחליטה להקצות תקציב לשיקום הצפון. [...]");
    }

    #[test]
    fn test_truncated_summary_after_identity_restatement() {
        let mut ai = response();
        ai.summary =
            "החלטה מספר 1234. הממשלה מחליטה להקצות תקציב לשיקום הצפון ומבקשת מוועדת הכ".into();
        let processed = processor().process_response(&candidate("כותרת", "גוף."), &ai);
        assert_eq!(
            processed.record.summary,
            "הממשלה מחליטה להקצות תקציב לשיקום הצפון ומבקשת מוועדת [...]"
        );
        assert!(processed.report.fixups.contains(&Fixup::SummaryTruncationRepaired));
        assert!(processed.report.fixups.contains(&Fixup::IdentityPrefixStripped));

        let again = processor().process(processed.record.clone());
        assert_eq!(again.record, processed.record);
    }

    #[test]
    fn test_exclusion_uses_decision_text() {
        let mut ai = response();
        ai.policy_areas = vec!["חינוך".into()];
        let processed = processor().process_response(
            &candidate("תכנית הכשרה מקצועית", "הממשלה מחליטה על תכנית הכשרה מקצועית לעובדים."),
            &ai,
        );
        assert!(processed.record.policy_areas.is_empty());
    }

    #[test]
    fn test_processing_is_idempotent() {
        let p = processor();
        let inputs = [
            (candidate("חיזוק מערך הבריאות", "גוף   ההחלטה.\n\n"), response()),
            (candidate("מינוי מנהל", "\u{200F}גוף"), response()),
            (
                candidate("כותרת", "גוף"),
                AiResponse {
                    summary: "החלטת הממשלה מס' 1234 - סיכום ארוך שנקטע באמצע המשפט ולא הסתי".into(),
                    classification: "".into(),
                    ..response()
                },
            ),
        ];
        for (candidate, ai) in inputs {
            let once = p.process_response(&candidate, &ai);
            let twice = p.process(once.record.clone());
            assert_eq!(twice.record, once.record);
            assert!(twice.report.is_clean(), "second pass changed: {:?}", twice.report);
        }
    }
}
