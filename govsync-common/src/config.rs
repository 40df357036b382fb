//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every section is
//! optional and falls back to built-in defaults, so a missing file is a
//! warning rather than a startup failure. A file that exists but cannot be
//! parsed, or that carries out-of-range values, is a fatal `Error::Config`.
//!
//! Resolution priority for the config file and root folder:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`GOVSYNC_CONFIG`, `GOVSYNC_ROOT_FOLDER`)
//! 3. TOML config file (root folder only)
//! 4. OS-dependent default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "GOVSYNC_CONFIG";
/// Environment variable naming the root folder (database, default vocabulary)
pub const ROOT_FOLDER_ENV_VAR: &str = "GOVSYNC_ROOT_FOLDER";
/// Environment variable carrying the AI service API key
pub const AI_API_KEY_ENV_VAR: &str = "GOVSYNC_AI_API_KEY";

const CONFIG_FILE_NAME: &str = "govsync.toml";
const DATABASE_FILE_NAME: &str = "govsync.db";
const VOCABULARY_FILE_NAME: &str = "vocabularies.toml";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and default vocabulary file
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ai: AiConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub post_processing: PostProcessingConfig,
}

/// SQLite connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file (defaults to `<root_folder>/govsync.db`)
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// SQLite busy_timeout applied to every connection
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Upper bound on batch-level lock retries before records are deferred
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Generative AI collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// OpenAI-compatible chat completions endpoint
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_ai_model")]
    pub model: String,

    /// API key (the `GOVSYNC_AI_API_KEY` environment variable takes priority)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request pacing quota shared by all workers
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// Incremental sync and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Bounded parallelism for the AI-call stage
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Filtered mode keeps candidates from `baseline_year - lookback_years` onward
    #[serde(default = "default_lookback_years")]
    pub lookback_years: i32,

    /// Candidates dispatched per batch (cancellation is checked between batches)
    #[serde(default = "default_dispatch_batch_size")]
    pub dispatch_batch_size: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Persistence gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Records written per transaction
    #[serde(default = "default_write_batch_size")]
    pub batch_size: usize,
}

/// Label validation and field normalization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Vocabulary definition file (defaults to `<root_folder>/vocabularies.toml`)
    #[serde(default)]
    pub vocabulary_path: Option<PathBuf>,

    /// Default token-set Jaccard acceptance threshold
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Date format used by the content source
    #[serde(default = "default_source_date_format")]
    pub source_date_format: String,

    /// Date format written to the relational store
    #[serde(default = "default_storage_date_format")]
    pub storage_date_format: String,
}

/// Summary repair settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessingConfig {
    /// Appended to a summary that was cut back to a sentence boundary
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,

    /// Summaries shorter than this are never treated as truncated
    #[serde(default = "default_truncation_min_chars")]
    pub truncation_min_chars: usize,

    /// Trailing characters searched for terminal punctuation
    #[serde(default = "default_truncation_tail_window")]
    pub truncation_tail_window: usize,
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    250
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "govsync_ai=info,govsync_common=info".to_string()
}

fn default_ai_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.0
}

fn default_concurrency() -> usize {
    4
}

fn default_lookback_years() -> i32 {
    1
}

fn default_dispatch_batch_size() -> usize {
    20
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_write_batch_size() -> usize {
    25
}

fn default_similarity_threshold() -> f64 {
    0.5
}

fn default_source_date_format() -> String {
    "%d.%m.%Y".to_string()
}

fn default_storage_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_truncation_marker() -> String {
    "[...]".to_string()
}

fn default_truncation_min_chars() -> usize {
    60
}

fn default_truncation_tail_window() -> usize {
    2
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ai_endpoint(),
            model: default_ai_model(),
            api_key: None,
            requests_per_minute: default_requests_per_minute(),
            request_timeout_secs: default_request_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            lookback_years: default_lookback_years(),
            dispatch_batch_size: default_dispatch_batch_size(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_write_batch_size(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            vocabulary_path: None,
            similarity_threshold: default_similarity_threshold(),
            source_date_format: default_source_date_format(),
            storage_date_format: default_storage_date_format(),
        }
    }
}

impl Default for PostProcessingConfig {
    fn default() -> Self {
        Self {
            truncation_marker: default_truncation_marker(),
            truncation_min_chars: default_truncation_min_chars(),
            truncation_tail_window: default_truncation_tail_window(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate ranges
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync.concurrency == 0 {
            return Err(Error::Config("sync.concurrency must be at least 1".to_string()));
        }
        if self.sync.dispatch_batch_size == 0 {
            return Err(Error::Config(
                "sync.dispatch_batch_size must be at least 1".to_string(),
            ));
        }
        if self.sync.max_attempts == 0 {
            return Err(Error::Config("sync.max_attempts must be at least 1".to_string()));
        }
        if self.sync.initial_delay_ms > self.sync.max_delay_ms {
            return Err(Error::Config(format!(
                "sync.initial_delay_ms ({}) exceeds sync.max_delay_ms ({})",
                self.sync.initial_delay_ms, self.sync.max_delay_ms
            )));
        }
        if self.sync.lookback_years < 0 {
            return Err(Error::Config("sync.lookback_years must not be negative".to_string()));
        }
        if self.persistence.batch_size == 0 {
            return Err(Error::Config(
                "persistence.batch_size must be at least 1".to_string(),
            ));
        }
        let threshold = self.validation.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Config(format!(
                "validation.similarity_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.ai.requests_per_minute == 0 {
            return Err(Error::Config(
                "ai.requests_per_minute must be at least 1".to_string(),
            ));
        }
        if self.post_processing.truncation_marker.trim().is_empty() {
            return Err(Error::Config(
                "post_processing.truncation_marker must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the root folder: CLI → ENV → TOML → OS default
    pub fn resolve_root_folder(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Some(path) = &self.root_folder {
            return path.clone();
        }
        default_root_folder()
    }

    /// Database file path, relative to the resolved root folder when unset
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| root_folder.join(DATABASE_FILE_NAME))
    }

    /// Vocabulary definition file, relative to the resolved root folder when unset
    pub fn vocabulary_path(&self, root_folder: &Path) -> PathBuf {
        self.validation
            .vocabulary_path
            .clone()
            .unwrap_or_else(|| root_folder.join(VOCABULARY_FILE_NAME))
    }

    /// AI API key: ENV → TOML
    pub fn resolve_ai_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(AI_API_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                info!("AI API key loaded from environment variable");
                return Some(key);
            }
        }
        self.ai
            .api_key
            .as_ref()
            .filter(|key| !key.trim().is_empty())
            .cloned()
    }
}

/// Locate the config file: CLI → ENV → user config dir → /etc
///
/// Returns `None` when no candidate exists; callers fall back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("govsync").join(CONFIG_FILE_NAME));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/govsync").join(CONFIG_FILE_NAME);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load configuration, degrading to defaults when the file is absent
///
/// A present-but-malformed file is an `Error::Config`.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using built-in defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config = TomlConfig::from_toml_str(&content)?;
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("govsync"))
        .unwrap_or_else(|| PathBuf::from("./govsync_data"))
}
