//! Candidate file loading
//!
//! The browser-automation collector hands over the decisions it observed as
//! a JSON file: either one array or one object per line (JSON-lines). Raw
//! fields are normalized and dates converted here, before anything reaches
//! the sync engine. A malformed entry is logged and skipped; it never
//! aborts the load.

use crate::normalize::{normalize_block, normalize_text, parse_date};
use crate::types::{CandidateItem, DecisionKey};
use govsync_common::config::ValidationConfig;
use govsync_common::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Candidate as written by the collector
#[derive(Debug, Clone, Deserialize)]
pub struct RawCandidate {
    #[serde(alias = "key")]
    pub decision_key: String,
    #[serde(alias = "date")]
    pub decision_date: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "body")]
    pub content: String,
    #[serde(default)]
    pub committee: Option<String>,
    #[serde(default, alias = "source_url")]
    pub url: Option<String>,
}

impl RawCandidate {
    /// Normalize fields and parse identity and date
    ///
    /// Dates are read in the configured source format; ISO dates written by
    /// newer collectors (the storage format) are accepted as well.
    pub fn into_candidate(self, config: &ValidationConfig) -> Result<CandidateItem> {
        let key: DecisionKey = normalize_text(&self.decision_key).parse()?;
        let date = parse_date(&self.decision_date, &config.source_date_format)
            .or_else(|err| parse_date(&self.decision_date, &config.storage_date_format).map_err(|_| err))?;

        let title = normalize_text(&self.title);
        if title.is_empty() {
            return Err(Error::InvalidInput(format!("Decision {} has no title", key)));
        }

        Ok(CandidateItem {
            key,
            date,
            title,
            body: normalize_block(&self.content),
            committee: self.committee.map(|c| normalize_text(&c)).filter(|c| !c.is_empty()),
            url: self.url.map(|u| normalize_text(&u)).filter(|u| !u.is_empty()),
        })
    }
}

/// Load candidates from a JSON array or JSON-lines file
pub fn load_candidates(path: &Path, config: &ValidationConfig) -> Result<Vec<CandidateItem>> {
    let content = std::fs::read_to_string(path)?;
    let candidates = parse_candidates(&content, config)?;
    info!(
        path = %path.display(),
        candidates = candidates.len(),
        "Candidates loaded"
    );
    Ok(candidates)
}

/// Parse candidate file content; only an unreadable top-level array is an error
pub fn parse_candidates(content: &str, config: &ValidationConfig) -> Result<Vec<CandidateItem>> {
    let trimmed = content.trim_start_matches('\u{FEFF}').trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<(usize, std::result::Result<RawCandidate, String>)> = if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> = serde_json::from_str(trimmed)
            .map_err(|e| Error::InvalidInput(format!("Candidate array is not valid JSON: {}", e)))?;
        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                (index + 1, serde_json::from_value(value).map_err(|e| e.to_string()))
            })
            .collect()
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                (index + 1, serde_json::from_str(line.trim()).map_err(|e| e.to_string()))
            })
            .collect()
    };

    let mut candidates = Vec::with_capacity(entries.len());
    for (position, entry) in entries {
        let converted = entry
            .map_err(Error::InvalidInput)
            .and_then(|raw| raw.into_candidate(config));
        match converted {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => warn!(position, error = %e, "Skipping malformed candidate"),
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn config() -> ValidationConfig {
        ValidationConfig::default()
    }

    #[test]
    fn test_parse_json_array() {
        let content = r#"[
            {"decision_key": "37_1234", "decision_date": "05.03.2024",
             "title": "  החלטה\u200f ", "content": "שורה  א\n\nשורה ב", "committee": ""},
            {"decision_key": "37_1235א", "decision_date": "2024-03-06", "title": "אחרת"}
        ]"#;
        let candidates = parse_candidates(content, &config()).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].key, DecisionKey::new(37, 1234));
        assert_eq!(candidates[0].date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(candidates[0].title, "החלטה");
        assert_eq!(candidates[0].body, "שורה א\nשורה ב");
        assert_eq!(candidates[0].committee, None);
        assert_eq!(candidates[1].key.suffix, Some('א'));
    }

    #[test]
    fn test_parse_json_lines_skips_bad_lines() {
        let content = concat!(
            "{\"decision_key\": \"37_1\", \"decision_date\": \"01.01.2024\", \"title\": \"א\"}\n",
            "not json at all\n",
            "\n",
            "{\"decision_key\": \"bogus\", \"decision_date\": \"01.01.2024\", \"title\": \"ב\"}\n",
            "{\"decision_key\": \"37_2\", \"decision_date\": \"31/01/2024\", \"title\": \"ג\"}\n",
            "{\"decision_key\": \"37_3\", \"decision_date\": \"02.01.2024\", \"title\": \"ד\"}\n",
        );
        let candidates = parse_candidates(content, &config()).unwrap();
        let keys: Vec<String> = candidates.iter().map(|c| c.key.to_string()).collect();
        assert_eq!(keys, vec!["37_1", "37_3"]);
    }

    #[test]
    fn test_broken_array_is_error() {
        assert!(parse_candidates("[{\"decision_key\": ", &config()).is_err());
    }

    #[test]
    fn test_empty_file_is_empty() {
        assert!(parse_candidates("  \n", &config()).unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candidates.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "{{\"key\": \"36_10\", \"date\": \"10.10.2022\", \"title\": \"t\", \"body\": \"b\"}}"
        )
        .unwrap();
        let candidates = load_candidates(&path, &config()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].body, "b");
    }
}
