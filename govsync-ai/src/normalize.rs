//! Field normalization
//!
//! Pure, stateless text cleanup applied to raw source fields before the AI
//! call and to every AI-produced text field before validation, so both sides
//! are compared on equal footing. Every function here is idempotent:
//! `f(f(x)) == f(x)`.

use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;

/// Bidirectional control characters and zero-width marks copied along with
/// Hebrew text from rendered pages
const DIRECTIONAL_MARKS: &[char] = &[
    '\u{200B}', // zero width space
    '\u{200E}', // left-to-right mark
    '\u{200F}', // right-to-left mark
    '\u{061C}', // arabic letter mark
    '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}', // embeddings / overrides
    '\u{2066}', '\u{2067}', '\u{2068}', '\u{2069}', // isolates
    '\u{FEFF}', // byte order mark
];

/// Date conversion failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot parse date '{raw}' with format '{format}'")]
pub struct DateParseError {
    pub raw: String,
    pub format: String,
}

impl From<DateParseError> for govsync_common::Error {
    fn from(err: DateParseError) -> Self {
        govsync_common::Error::InvalidInput(err.to_string())
    }
}

/// Collapse every whitespace run (including NBSP and newlines) to one space and trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove bidirectional control characters and zero-width marks
pub fn strip_directional_marks(text: &str) -> String {
    text.chars().filter(|c| !DIRECTIONAL_MARKS.contains(c)).collect()
}

/// Single-line field cleanup: directional marks, then whitespace
pub fn normalize_text(text: &str) -> String {
    normalize_whitespace(&strip_directional_marks(text))
}

/// Multi-line field cleanup preserving line structure
///
/// Each line is normalized and empty lines are dropped.
pub fn normalize_block(text: &str) -> String {
    strip_directional_marks(text)
        .lines()
        .map(normalize_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Comparison key for case/diacritic-insensitive matching
///
/// Lowercases, drops Hebrew points and combining marks, folds Hebrew
/// punctuation (geresh, gershayim, maqaf) and typographic quotes to ASCII,
/// then normalizes whitespace.
pub fn fold_for_match(text: &str) -> String {
    let folded: String = strip_directional_marks(text)
        .to_lowercase()
        .chars()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            '\u{05F3}' | '\u{2018}' | '\u{2019}' | '`' => '\'',
            '\u{05F4}' | '\u{201C}' | '\u{201D}' => '"',
            '\u{05BE}' | '\u{2010}' | '\u{2013}' | '\u{2014}' | '-' => ' ',
            other => other,
        })
        .collect();
    normalize_whitespace(&folded)
}

/// Word-level token set of a folded string, edge punctuation trimmed
pub fn token_set(text: &str) -> HashSet<String> {
    fold_for_match(text)
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| c.is_ascii_punctuation()))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Hebrew points/cantillation and generic combining diacritics
fn is_combining_mark(c: char) -> bool {
    matches!(c,
        '\u{0591}'..='\u{05BD}'
        | '\u{05BF}'
        | '\u{05C1}'..='\u{05C2}'
        | '\u{05C4}'..='\u{05C5}'
        | '\u{05C7}'
        | '\u{0300}'..='\u{036F}')
}

/// Parse a source date string
pub fn parse_date(raw: &str, from_format: &str) -> Result<NaiveDate, DateParseError> {
    let cleaned = normalize_text(raw);
    NaiveDate::parse_from_str(&cleaned, from_format).map_err(|_| DateParseError {
        raw: raw.to_string(),
        format: from_format.to_string(),
    })
}

/// Convert a date string between formats (e.g. `%d.%m.%Y` → `%Y-%m-%d`)
pub fn convert_date(raw: &str, from_format: &str, to_format: &str) -> Result<String, DateParseError> {
    parse_date(raw, from_format).map(|date| date.format(to_format).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace_collapses_and_trims() {
        assert_eq!(normalize_whitespace("  משרד \t הבריאות\n"), "משרד הבריאות");
        assert_eq!(normalize_whitespace("a\u{00A0}\u{00A0}b"), "a b");
        assert_eq!(normalize_whitespace(""), "");
    }

    #[test]
    fn test_strip_directional_marks() {
        assert_eq!(strip_directional_marks("\u{200F}החלטה\u{200E} 12"), "החלטה 12");
        assert_eq!(strip_directional_marks("\u{2067}ירושלים\u{2069}"), "ירושלים");
    }

    #[test]
    fn test_normalize_text_is_idempotent() {
        let inputs = [
            "  \u{200F}משרד   הבריאות \u{FEFF}",
            "plain",
            "\n\t",
            "ועדת  השרים\u{00A0}לענייני חקיקה",
        ];
        for input in inputs {
            let once = normalize_text(input);
            assert_eq!(normalize_text(&once), once);
        }
    }

    #[test]
    fn test_normalize_block_keeps_lines() {
        let text = "שורה   ראשונה\n\n  \u{200F}שורה שנייה  \n";
        let normalized = normalize_block(text);
        assert_eq!(normalized, "שורה ראשונה\nשורה שנייה");
        assert_eq!(normalize_block(&normalized), normalized);
    }

    #[test]
    fn test_fold_for_match_ignores_case_and_points() {
        assert_eq!(fold_for_match("Ministry OF Health"), "ministry of health");
        // Pointed and unpointed spellings compare equal
        assert_eq!(fold_for_match("יְרוּשָׁלַיִם"), fold_for_match("ירושלים"));
        assert_eq!(fold_for_match("מנכ״ל"), fold_for_match("מנכ\"ל"));
        assert_eq!(fold_for_match("תל־אביב"), "תל אביב");
    }

    #[test]
    fn test_fold_for_match_is_idempotent() {
        let once = fold_for_match(" תל־אביב–יפו  ");
        assert_eq!(fold_for_match(&once), once);
    }

    #[test]
    fn test_token_set_trims_edge_punctuation() {
        let tokens = token_set("ועדת השרים, (לענייני) חקיקה.");
        assert_eq!(tokens.len(), 4);
        assert!(tokens.contains("לענייני"));
        assert!(tokens.contains("חקיקה"));
        // Inner gershayim survives
        assert!(token_set("מנכ\"ל המשרד").contains("מנכ\"ל"));
    }

    #[test]
    fn test_convert_date() {
        assert_eq!(
            convert_date("05.03.2024", "%d.%m.%Y", "%Y-%m-%d").unwrap(),
            "2024-03-05"
        );
        assert_eq!(
            convert_date(" \u{200F}31.12.2023 ", "%d.%m.%Y", "%Y-%m-%d").unwrap(),
            "2023-12-31"
        );
    }

    #[test]
    fn test_convert_date_rejects_garbage() {
        let err = convert_date("31/12/2023", "%d.%m.%Y", "%Y-%m-%d").unwrap_err();
        assert_eq!(err.raw, "31/12/2023");
        assert!(convert_date("32.01.2024", "%d.%m.%Y", "%Y-%m-%d").is_err());
    }
}
