//! Summary repair
//!
//! Two fixups for AI-written summaries:
//! - Truncation repair: a summary that stops mid-sentence is cut back to its
//!   last sentence boundary (or last whole word) and marked with the
//!   truncation marker.
//! - Identity restatement: a leading "החלטה מספר 1234: ..." that merely
//!   repeats the decision's own number is removed.

use crate::types::DecisionKey;
use govsync_common::config::PostProcessingConfig;
use govsync_common::{Error, Result};
use regex::Regex;

/// Characters that close a sentence
const SENTENCE_END: &[char] = &['.', '!', '?', '…'];

/// Truncation repair settings
#[derive(Debug, Clone)]
pub struct TruncationRepair {
    marker: String,
    min_chars: usize,
    tail_window: usize,
}

impl TruncationRepair {
    pub fn new(config: &PostProcessingConfig) -> Self {
        Self {
            marker: config.truncation_marker.clone(),
            min_chars: config.truncation_min_chars,
            tail_window: config.truncation_tail_window.max(1),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// True when `summary` looks cut off mid-sentence
    pub fn is_truncated(&self, summary: &str) -> bool {
        let summary = summary.trim_end();
        if summary.ends_with(self.marker.as_str()) {
            return false;
        }
        if summary.chars().count() < self.min_chars {
            return false;
        }
        !summary
            .chars()
            .rev()
            .take(self.tail_window)
            .any(|c| SENTENCE_END.contains(&c))
    }

    /// Repaired summary, or `None` when it is already complete
    pub fn repair(&self, summary: &str) -> Option<String> {
        if !self.is_truncated(summary) {
            return None;
        }
        let summary = summary.trim_end();

        let kept = match summary.rfind(SENTENCE_END) {
            Some(index) => {
                let boundary = index + summary[index..].chars().next().map_or(1, char::len_utf8);
                &summary[..boundary]
            }
            None => last_whole_words(summary),
        };

        Some(format!("{} {}", kept.trim_end(), self.marker))
    }
}

/// Drop the trailing (possibly partial) word and dangling separators
fn last_whole_words(text: &str) -> &str {
    match text.rfind(char::is_whitespace) {
        Some(index) => text[..index].trim_end_matches(|c: char| {
            c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-' | '–')
        }),
        None => text,
    }
}

/// Strips a leading restatement of the decision's own number
#[derive(Debug, Clone)]
pub struct IdentityStripper {
    prefix: Regex,
}

impl IdentityStripper {
    pub fn new() -> Result<Self> {
        // "החלטה מספר", "החלטת הממשלה מס'", "בהחלטה מס." ...; the number is
        // matched separately so it can be compared against the key
        let prefix = Regex::new(
            r#"^\s*[בל]?החלט(?:ה|ת\s+(?:ה)?ממשלה)\s*(?:מספר|מס\s*['׳"]?\s*\.?)?\s*(\d+[\p{Hebrew}]?)\s*[:\-–,.]?\s*"#,
        )
        .map_err(|e| Error::Internal(format!("Identity prefix pattern: {}", e)))?;
        Ok(Self { prefix })
    }

    /// Byte length of the leading restatements of `key` in `summary`
    pub fn restatement_len(&self, summary: &str, key: &DecisionKey) -> usize {
        let number_label = key.number_label();
        let mut consumed = 0;

        while let Some(caps) = self.prefix.captures(&summary[consumed..]) {
            let Some(number) = caps.get(1) else { break };
            // A bare number restates this decision; a suffixed one must match exactly
            let same_decision =
                number.as_str() == number_label || number.as_str() == key.number.to_string();
            if !same_decision {
                break;
            }
            consumed += caps[0].len();
        }

        consumed
    }

    /// Remove every leading restatement of `key`
    ///
    /// The summary is kept as-is when nothing but punctuation or a marker
    /// would remain.
    pub fn strip(&self, summary: &str, key: &DecisionKey) -> String {
        let summary = summary.trim();
        let rest = summary[self.restatement_len(summary, key)..].trim_start();
        if rest.chars().any(char::is_alphanumeric) {
            rest.to_string()
        } else {
            summary.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair() -> TruncationRepair {
        TruncationRepair::new(&PostProcessingConfig {
            truncation_marker: "[...]".to_string(),
            truncation_min_chars: 20,
            truncation_tail_window: 2,
        })
    }

    #[test]
    fn test_truncated_summary_trimmed_to_last_sentence() {
        let summary = "הממשלה מחליטה להקצות תקציב לשיקום הצפון. הממשלה מאשרת את התכנית ומבקשת מוועדת הכ";
        let repaired = repair().repair(summary).unwrap();
        assert_eq!(repaired, "הממשלה מחליטה להקצות תקציב לשיקום הצפון. [...]");
    }

    #[test]
    fn test_truncated_without_boundary_trimmed_to_whole_word() {
        let summary = "הממשלה מחליטה להקצות תקציב לשיקום, הצפון ומבק";
        let repaired = repair().repair(summary).unwrap();
        assert_eq!(repaired, "הממשלה מחליטה להקצות תקציב לשיקום, הצפון [...]");
    }

    #[test]
    fn test_complete_summary_untouched() {
        let r = repair();
        assert_eq!(r.repair("הממשלה מחליטה להקצות תקציב לשיקום הצפון."), None);
        // Closing quote after the period still falls inside the tail window
        assert_eq!(r.repair("הממשלה מחליטה לאמץ את המלצות \"ועדת טרכטנברג.\""), None);
    }

    #[test]
    fn test_short_summary_untouched() {
        assert_eq!(repair().repair("תקציר קצר"), None);
    }

    #[test]
    fn test_marker_counts_as_complete() {
        let r = repair();
        let once = r.repair("הממשלה מחליטה להקצות תקציב. ומבקשת מוועדת הכ").unwrap();
        assert_eq!(r.repair(&once), None);
    }

    #[test]
    fn test_strip_identity_restatement() {
        let stripper = IdentityStripper::new().unwrap();
        let key = DecisionKey::new(37, 1234);
        assert_eq!(
            stripper.strip("החלטה מספר 1234: הממשלה מחליטה להקים רשות", &key),
            "הממשלה מחליטה להקים רשות"
        );
        assert_eq!(
            stripper.strip("החלטת הממשלה מס' 1234 - החלטה מספר 1234: לאשר", &key),
            "לאשר"
        );
    }

    #[test]
    fn test_strip_keeps_other_decision_numbers() {
        let stripper = IdentityStripper::new().unwrap();
        let key = DecisionKey::new(37, 1234);
        let summary = "החלטה מספר 999 בוטלה והוחלפה";
        assert_eq!(stripper.strip(summary, &key), summary);
        // 12345 is not 1234
        let summary = "החלטה מספר 12345: לאשר";
        assert_eq!(stripper.strip(summary, &key), summary);
    }

    #[test]
    fn test_strip_never_empties_summary() {
        let stripper = IdentityStripper::new().unwrap();
        let key = DecisionKey::new(37, 1234);
        assert_eq!(stripper.strip("החלטה מספר 1234", &key), "החלטה מספר 1234");
    }

    #[test]
    fn test_strip_keeps_restatement_followed_only_by_marker() {
        let stripper = IdentityStripper::new().unwrap();
        let key = DecisionKey::new(37, 1234);
        assert_eq!(stripper.strip("החלטה מספר 1234. [...]", &key), "החלטה מספר 1234. [...]");
    }

    #[test]
    fn test_restatement_len_covers_repeated_prefixes() {
        let stripper = IdentityStripper::new().unwrap();
        let key = DecisionKey::new(37, 1234);
        let summary = "החלטה מספר 1234. החלטת הממשלה מס' 1234: לאשר";
        let len = stripper.restatement_len(summary, &key);
        assert_eq!(&summary[len..], "לאשר");
        assert_eq!(stripper.restatement_len("לאשר את התכנית", &key), 0);
    }

    #[test]
    fn test_strip_suffixed_key() {
        let stripper = IdentityStripper::new().unwrap();
        let key = DecisionKey::new(37, 1234).with_suffix('א');
        assert_eq!(stripper.strip("החלטה מספר 1234א: לאשר", &key), "לאשר");
    }
}
