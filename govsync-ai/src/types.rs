//! Core domain types
//!
//! - [`DecisionKey`]: composite identity (government, decision number, suffix)
//! - [`CandidateItem`]: one unit of work handed over by the collector
//! - [`AiResponse`]: untyped AI output, never trusted as-is
//! - [`EnrichedRecord`]: candidate plus validated AI-derived fields

use chrono::NaiveDate;
use govsync_common::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Identity
// ============================================================================

/// Composite identity of a government decision
///
/// Text form is `"{government}_{number}{suffix}"`, e.g. `37_1234` or `37_1234א`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DecisionKey {
    /// Series identifier (government number)
    pub government: u32,
    /// Sequence number within the series
    pub number: u32,
    /// Letter disambiguator for split decisions
    pub suffix: Option<char>,
}

impl DecisionKey {
    pub fn new(government: u32, number: u32) -> Self {
        Self {
            government,
            number,
            suffix: None,
        }
    }

    pub fn with_suffix(mut self, suffix: char) -> Self {
        self.suffix = Some(suffix);
        self
    }

    /// Decision number as printed in source text ("1234", "1234א")
    pub fn number_label(&self) -> String {
        match self.suffix {
            Some(suffix) => format!("{}{}", self.number, suffix),
            None => self.number.to_string(),
        }
    }
}

impl fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.government, self.number_label())
    }
}

impl FromStr for DecisionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidInput(format!("Malformed decision key: '{}'", s));

        let (government, rest) = s.trim().split_once('_').ok_or_else(invalid)?;
        let government: u32 = government.parse().map_err(|_| invalid())?;

        let digits_end = rest
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (digits, tail) = rest.split_at(digits_end);
        let number: u32 = digits.parse().map_err(|_| invalid())?;

        let mut tail_chars = tail.chars();
        let suffix = match (tail_chars.next(), tail_chars.next()) {
            (None, _) => None,
            (Some(c), None) if c.is_alphabetic() => Some(c),
            _ => return Err(invalid()),
        };

        Ok(Self {
            government,
            number,
            suffix,
        })
    }
}

impl TryFrom<String> for DecisionKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DecisionKey> for String {
    fn from(key: DecisionKey) -> Self {
        key.to_string()
    }
}

/// Sync ordering: date first, then sequence number, then suffix
pub type SyncOrder = (NaiveDate, u32, Option<char>);

// ============================================================================
// Candidate
// ============================================================================

/// One unit of work from the upstream collector (immutable in the pipeline)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub key: DecisionKey,
    pub date: NaiveDate,
    pub title: String,
    pub body: String,
    /// Originating committee, when the decision was taken by one
    pub committee: Option<String>,
    pub url: Option<String>,
}

impl CandidateItem {
    pub fn sync_order(&self) -> SyncOrder {
        (self.date, self.key.number, self.key.suffix)
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Binary operativity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Decision directs concrete action
    Operative,
    /// Declarative, registry or formal decision
    NonOperative,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Operative => "operative",
            Classification::NonOperative => "non-operative",
        }
    }

    /// Stored form used by the relational store
    pub fn hebrew_label(&self) -> &'static str {
        match self {
            Classification::Operative => "אופרטיבית",
            Classification::NonOperative => "דקלרטיבית",
        }
    }

    /// Parse an AI-provided or stored value; `None` when unrecognized
    pub fn parse(raw: &str) -> Option<Self> {
        let value = raw.trim().to_lowercase().replace(['_', ' '], "-");
        match value.as_str() {
            "operative" | "אופרטיבית" | "אופרטיבי" => Some(Classification::Operative),
            "non-operative" | "nonoperative" | "declarative" | "דקלרטיבית" | "דקלרטיבי" => {
                Some(Classification::NonOperative)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Label fields
// ============================================================================

/// The three closed-vocabulary label sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelField {
    PolicyAreas,
    GovernmentBodies,
    Locations,
}

impl LabelField {
    /// Union order for the derived all-labels field
    pub const ALL: [LabelField; 3] = [
        LabelField::PolicyAreas,
        LabelField::GovernmentBodies,
        LabelField::Locations,
    ];

    /// Vocabulary name and diagnostic field name
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelField::PolicyAreas => "policy_areas",
            LabelField::GovernmentBodies => "government_bodies",
            LabelField::Locations => "locations",
        }
    }
}

impl fmt::Display for LabelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AI output
// ============================================================================

/// Structured response from the AI collaborator
///
/// Every field is untrusted. Label lists accept either a JSON array or a
/// single `;`-separated string, since models produce both.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AiResponse {
    #[serde(default)]
    pub summary: String,
    #[serde(default, alias = "operativity")]
    pub classification: String,
    #[serde(default, alias = "tags_policy_area", deserialize_with = "string_or_list")]
    pub policy_areas: Vec<String>,
    #[serde(default, alias = "tags_government_body", deserialize_with = "string_or_list")]
    pub government_bodies: Vec<String>,
    #[serde(default, alias = "tags_location", deserialize_with = "string_or_list")]
    pub locations: Vec<String>,
}

fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
        Missing(()),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s
            .split([';', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        StringOrList::Many(list) => list,
        StringOrList::Missing(()) => Vec::new(),
    })
}

// ============================================================================
// Enriched record
// ============================================================================

/// Candidate plus AI-derived fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub key: DecisionKey,
    pub date: NaiveDate,
    pub title: String,
    pub body: String,
    pub committee: Option<String>,
    pub url: Option<String>,
    pub summary: String,
    pub classification: Option<Classification>,
    pub policy_areas: Vec<String>,
    pub government_bodies: Vec<String>,
    pub locations: Vec<String>,
    /// Ordered union of the three label sets (always recomputed)
    pub all_tags: Vec<String>,
}

impl EnrichedRecord {
    /// Draft record from a candidate and raw AI output
    ///
    /// `all_tags` starts empty; the post-processor derives it.
    pub fn draft(
        candidate: &CandidateItem,
        response: &AiResponse,
        classification: Option<Classification>,
    ) -> Self {
        Self {
            key: candidate.key,
            date: candidate.date,
            title: candidate.title.clone(),
            body: candidate.body.clone(),
            committee: candidate.committee.clone(),
            url: candidate.url.clone(),
            summary: response.summary.clone(),
            classification,
            policy_areas: response.policy_areas.clone(),
            government_bodies: response.government_bodies.clone(),
            locations: response.locations.clone(),
            all_tags: Vec::new(),
        }
    }

    pub fn labels(&self, field: LabelField) -> &[String] {
        match field {
            LabelField::PolicyAreas => &self.policy_areas,
            LabelField::GovernmentBodies => &self.government_bodies,
            LabelField::Locations => &self.locations,
        }
    }

    pub fn labels_mut(&mut self, field: LabelField) -> &mut Vec<String> {
        match field {
            LabelField::PolicyAreas => &mut self.policy_areas,
            LabelField::GovernmentBodies => &mut self.government_bodies,
            LabelField::Locations => &mut self.locations,
        }
    }

    pub fn sync_order(&self) -> SyncOrder {
        (self.date, self.key.number, self.key.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_key_parse_and_display() {
        let key: DecisionKey = "37_1234".parse().unwrap();
        assert_eq!(key, DecisionKey::new(37, 1234));
        assert_eq!(key.to_string(), "37_1234");

        let suffixed: DecisionKey = "37_1234א".parse().unwrap();
        assert_eq!(suffixed.suffix, Some('א'));
        assert_eq!(suffixed.to_string(), "37_1234א");
        assert_eq!(suffixed.number_label(), "1234א");
    }

    #[test]
    fn test_decision_key_rejects_malformed() {
        for raw in ["", "37", "_12", "37_", "37_12ab", "x_12", "37_1-2"] {
            assert!(raw.parse::<DecisionKey>().is_err(), "accepted '{}'", raw);
        }
    }

    #[test]
    fn test_decision_key_serde_as_string() {
        let key = DecisionKey::new(36, 5).with_suffix('ב');
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"36_5ב\"");
        let back: DecisionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_classification_parse() {
        assert_eq!(Classification::parse("Operative"), Some(Classification::Operative));
        assert_eq!(Classification::parse(" non_operative "), Some(Classification::NonOperative));
        assert_eq!(Classification::parse("דקלרטיבית"), Some(Classification::NonOperative));
        assert_eq!(Classification::parse("אופרטיבית"), Some(Classification::Operative));
        assert_eq!(Classification::parse("maybe"), None);
    }

    #[test]
    fn test_ai_response_accepts_string_or_list() {
        let json = r#"{
            "summary": "תקציר",
            "classification": "operative",
            "policy_areas": "בריאות; חינוך",
            "government_bodies": ["משרד הבריאות"]
        }"#;
        let response: AiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.policy_areas, vec!["בריאות", "חינוך"]);
        assert_eq!(response.government_bodies, vec!["משרד הבריאות"]);
        assert!(response.locations.is_empty());
    }

    #[test]
    fn test_ai_response_accepts_stored_column_names() {
        let json = r#"{"operativity": "דקלרטיבית", "tags_location": "חיפה"}"#;
        let response: AiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.classification, "דקלרטיבית");
        assert_eq!(response.locations, vec!["חיפה"]);
    }
}
