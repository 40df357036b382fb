//! Closed label vocabularies
//!
//! A [`VocabularyStore`] is built once at startup from a TOML definition file
//! and shared read-only (`Arc`) by every worker. Any problem with the
//! definition is a fatal `Error::Config`; nothing here is reloaded during a
//! run.
//!
//! # File format
//! ```toml
//! [vocabularies.government_bodies]
//! version = "2024.2"
//! labels = ["משרד הבריאות", "ועדת השרים לענייני חקיקה"]
//!
//! [vocabularies.government_bodies.aliases]
//! "משרד הבריאות והרווחה" = "משרד הבריאות"
//!
//! [vocabularies.policy_areas.exclusions]
//! "חינוך" = ["הכשרה מקצועית"]
//!
//! [vocabularies.policy_areas.thresholds]
//! "ביטחון" = 0.8
//!
//! [post_processing.denylist]
//! locations = ["ישראל"]
//!
//! [post_processing.committee_aliases]
//! "ועדת שרים לחקיקה" = "ועדת השרים לענייני חקיקה"
//! ```

use crate::normalize::{fold_for_match, normalize_text, token_set};
use crate::types::LabelField;
use govsync_common::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::info;

/// Raw vocabulary file as deserialized from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VocabularyFile {
    #[serde(default)]
    pub vocabularies: BTreeMap<String, VocabularyDefinition>,
    #[serde(default)]
    pub post_processing: FixupDefinition,
}

/// One named vocabulary definition
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VocabularyDefinition {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Non-canonical surface form → canonical label
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Canonical label → phrases that alone must not trigger it
    #[serde(default)]
    pub exclusions: BTreeMap<String, Vec<String>>,
    /// Canonical label → stricter similarity threshold
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
}

/// Structural fixup tables, independent of the label vocabularies
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixupDefinition {
    /// Label field name → generic labels dropped from that set even when authorized
    #[serde(default)]
    pub denylist: BTreeMap<String, Vec<String>>,
    /// Committee name variant → canonical committee name
    #[serde(default)]
    pub committee_aliases: BTreeMap<String, String>,
}

// ============================================================================
// Vocabulary
// ============================================================================

/// Immutable set of authorized labels with alias, exclusion and threshold tables
#[derive(Debug, Clone)]
pub struct Vocabulary {
    name: String,
    version: String,
    labels: Vec<String>,
    tokens: Vec<HashSet<String>>,
    by_key: HashMap<String, usize>,
    aliases: HashMap<String, usize>,
    alias_forms: HashMap<usize, Vec<String>>,
    exclusions: HashMap<usize, Vec<String>>,
    thresholds: HashMap<usize, f64>,
    default_threshold: f64,
}

impl Vocabulary {
    /// Build a vocabulary from its definition
    ///
    /// Fails when the definition is empty, holds duplicate labels, or its
    /// alias/exclusion/threshold tables reference labels it does not authorize.
    pub fn from_definition(
        name: &str,
        definition: &VocabularyDefinition,
        default_threshold: f64,
    ) -> Result<Self> {
        let config_err = |msg: String| Error::Config(format!("Vocabulary '{}': {}", name, msg));

        if definition.labels.is_empty() {
            return Err(config_err("no labels defined".to_string()));
        }

        let mut labels = Vec::with_capacity(definition.labels.len());
        let mut tokens = Vec::with_capacity(definition.labels.len());
        let mut by_key = HashMap::new();

        for raw in &definition.labels {
            let label = normalize_text(raw);
            if label.is_empty() {
                return Err(config_err("blank label".to_string()));
            }
            let key = fold_for_match(&label);
            if by_key.insert(key, labels.len()).is_some() {
                return Err(config_err(format!("duplicate label '{}'", label)));
            }
            tokens.push(token_set(&label));
            labels.push(label);
        }

        let lookup = |label: &str| by_key.get(&fold_for_match(label)).copied();

        let mut aliases = HashMap::new();
        let mut alias_forms: HashMap<usize, Vec<String>> = HashMap::new();
        for (alias, target) in &definition.aliases {
            let index = lookup(target).ok_or_else(|| {
                config_err(format!("alias '{}' targets unknown label '{}'", alias, target))
            })?;
            let alias_key = fold_for_match(alias);
            if alias_key.is_empty() {
                return Err(config_err(format!("blank alias for '{}'", target)));
            }
            if let Some(&existing) = by_key.get(&alias_key) {
                if existing != index {
                    return Err(config_err(format!(
                        "alias '{}' shadows authorized label '{}'",
                        alias, labels[existing]
                    )));
                }
                continue;
            }
            aliases.insert(alias_key.clone(), index);
            alias_forms.entry(index).or_default().push(alias_key);
        }

        let mut exclusions = HashMap::new();
        for (label, patterns) in &definition.exclusions {
            let index = lookup(label).ok_or_else(|| {
                config_err(format!("exclusion references unknown label '{}'", label))
            })?;
            let folded: Vec<String> = patterns.iter().map(|p| fold_for_match(p)).collect();
            if folded.iter().any(|p| p.is_empty()) {
                return Err(config_err(format!("blank exclusion pattern for '{}'", label)));
            }
            exclusions.insert(index, folded);
        }

        let mut thresholds = HashMap::new();
        for (label, &threshold) in &definition.thresholds {
            let index = lookup(label).ok_or_else(|| {
                config_err(format!("threshold references unknown label '{}'", label))
            })?;
            if !(default_threshold..=1.0).contains(&threshold) {
                return Err(config_err(format!(
                    "threshold {} for '{}' must lie in [{}, 1.0]",
                    threshold, label, default_threshold
                )));
            }
            thresholds.insert(index, threshold);
        }

        Ok(Self {
            name: name.to_string(),
            version: definition
                .version
                .clone()
                .unwrap_or_else(|| "unversioned".to_string()),
            labels,
            tokens,
            by_key,
            aliases,
            alias_forms,
            exclusions,
            thresholds,
            default_threshold,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Canonical labels in definition order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// True when `label` is itself an authorized (canonical) label
    pub fn is_authorized(&self, label: &str) -> bool {
        self.by_key.contains_key(&fold_for_match(label))
    }

    /// Canonical form of `label`, via direct match or the alias map
    pub fn canonicalize(&self, label: &str) -> Option<&str> {
        self.index_of(label).map(|index| self.labels[index].as_str())
    }

    /// Acceptance threshold for a canonical label
    pub fn threshold_for(&self, label: &str) -> f64 {
        self.index_of(label)
            .and_then(|index| self.thresholds.get(&index).copied())
            .unwrap_or(self.default_threshold)
    }

    /// Folded exclusion patterns attached to a canonical label
    pub fn exclusions_for(&self, label: &str) -> &[String] {
        self.index_of(label)
            .and_then(|index| self.exclusions.get(&index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Folded surface forms (label and aliases) that count as evidence for a label
    pub fn surface_forms(&self, label: &str) -> Vec<String> {
        let Some(index) = self.index_of(label) else {
            return Vec::new();
        };
        std::iter::once(fold_for_match(&self.labels[index]))
            .chain(self.alias_forms.get(&index).into_iter().flatten().cloned())
            .collect()
    }

    /// Canonical labels with their precomputed token sets
    pub fn entries(&self) -> impl Iterator<Item = (&str, &HashSet<String>)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.tokens.iter())
    }

    fn index_of(&self, label: &str) -> Option<usize> {
        let key = fold_for_match(label);
        self.by_key
            .get(&key)
            .or_else(|| self.aliases.get(&key))
            .copied()
    }
}

// ============================================================================
// Fixup tables
// ============================================================================

/// Denylist and committee remapping tables
#[derive(Debug, Clone, Default)]
pub struct FixupTables {
    denylist: HashMap<LabelField, HashSet<String>>,
    committee_aliases: HashMap<String, String>,
}

impl FixupTables {
    pub fn from_definition(definition: &FixupDefinition) -> Result<Self> {
        let mut denylist = HashMap::new();
        for (name, labels) in &definition.denylist {
            let field = LabelField::ALL
                .into_iter()
                .find(|field| field.as_str() == name)
                .ok_or_else(|| {
                    Error::Config(format!("Denylist names unknown label field '{}'", name))
                })?;
            let folded: HashSet<String> = labels.iter().map(|l| fold_for_match(l)).collect();
            denylist.insert(field, folded);
        }

        let mut committee_aliases = HashMap::new();
        for (variant, canonical) in &definition.committee_aliases {
            let canonical = normalize_text(canonical);
            if canonical.is_empty() {
                return Err(Error::Config(format!(
                    "Committee alias '{}' maps to a blank name",
                    variant
                )));
            }
            committee_aliases.insert(fold_for_match(variant), canonical);
        }

        // A target that is itself remapped would make the fixup order-dependent
        for canonical in committee_aliases.values() {
            let key = fold_for_match(canonical);
            if let Some(next) = committee_aliases.get(&key) {
                if fold_for_match(next) != key {
                    return Err(Error::Config(format!(
                        "Committee alias target '{}' is itself remapped to '{}'",
                        canonical, next
                    )));
                }
            }
        }

        Ok(Self {
            denylist,
            committee_aliases,
        })
    }

    /// True when `label` is a generic entry dropped from `field`
    pub fn is_denied(&self, field: LabelField, label: &str) -> bool {
        self.denylist
            .get(&field)
            .is_some_and(|set| set.contains(&fold_for_match(label)))
    }

    /// Canonical committee name for a known variant
    pub fn canonical_committee(&self, name: &str) -> Option<&str> {
        self.committee_aliases
            .get(&fold_for_match(name))
            .map(String::as_str)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Process-wide, read-only vocabulary holder
#[derive(Debug, Clone)]
pub struct VocabularyStore {
    vocabularies: HashMap<LabelField, Vocabulary>,
    fixups: FixupTables,
}

impl VocabularyStore {
    /// Load and validate a vocabulary file from disk
    pub fn from_path(path: &Path, default_threshold: f64) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read vocabulary file {} failed: {}", path.display(), e))
        })?;
        let store = Self::from_toml_str(&content, default_threshold)?;
        info!(
            path = %path.display(),
            policy_areas = store.get(LabelField::PolicyAreas).len(),
            government_bodies = store.get(LabelField::GovernmentBodies).len(),
            locations = store.get(LabelField::Locations).len(),
            "Vocabularies loaded"
        );
        Ok(store)
    }

    /// Parse and validate a vocabulary file from TOML text
    pub fn from_toml_str(content: &str, default_threshold: f64) -> Result<Self> {
        let file: VocabularyFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse vocabulary TOML failed: {}", e)))?;
        Self::from_file(&file, default_threshold)
    }

    /// Build the store; all three label vocabularies are required
    pub fn from_file(file: &VocabularyFile, default_threshold: f64) -> Result<Self> {
        let mut vocabularies = HashMap::new();
        for field in LabelField::ALL {
            vocabularies.insert(field, load_vocabulary(file, field.as_str(), default_threshold)?);
        }
        let fixups = FixupTables::from_definition(&file.post_processing)?;
        Ok(Self {
            vocabularies,
            fixups,
        })
    }

    /// Vocabulary for a label field
    pub fn get(&self, field: LabelField) -> &Vocabulary {
        // Construction guarantees every field is present
        &self.vocabularies[&field]
    }

    /// Vocabulary by name; `Error::Config` for unknown names
    pub fn load(&self, name: &str) -> Result<&Vocabulary> {
        LabelField::ALL
            .iter()
            .find(|field| field.as_str() == name)
            .map(|field| self.get(*field))
            .ok_or_else(|| Error::Config(format!("Unknown vocabulary '{}'", name)))
    }

    pub fn fixups(&self) -> &FixupTables {
        &self.fixups
    }
}

/// Load one named vocabulary from a parsed file
pub fn load_vocabulary(
    file: &VocabularyFile,
    name: &str,
    default_threshold: f64,
) -> Result<Vocabulary> {
    let definition = file
        .vocabularies
        .get(name)
        .ok_or_else(|| Error::Config(format!("Vocabulary '{}' is not defined", name)))?;
    Vocabulary::from_definition(name, definition, default_threshold)
}
