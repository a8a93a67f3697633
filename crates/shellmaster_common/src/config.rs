//! Configuration management for ShellMaster.
//!
//! Precedence (lowest to highest):
//! 1. Built-in defaults (the `default_*` functions below)
//! 2. Config file: `$SHELLMASTER_CONFIG`, else `$XDG_CONFIG_HOME/shellmaster/config.toml`
//! 3. Environment overrides (only the `SHELLMASTER_*` variables listed in `ENV_OVERRIDES`)
//! 4. CLI flags (applied by the caller)
//!
//! A missing config file means defaults. A config file that exists but does not
//! parse is an error: behaviour never silently falls back.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SHELLMASTER_CONFIG";

const CONFIG_DIR: &str = "shellmaster";
const CONFIG_FILE: &str = "config.toml";
const CORPUS_FILE: &str = "corpus.json.gz";

/// Every environment variable that can change behaviour, with the key it overrides.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("SHELLMASTER_BASE_URL", "backend.base_url"),
    ("SHELLMASTER_MODEL", "backend.model"),
    ("SHELLMASTER_API_KEY", "backend.api_key"),
    ("SHELLMASTER_EMBEDDING", "embedding.kind"),
    ("SHELLMASTER_EMBEDDING_URL", "embedding.url"),
    ("SHELLMASTER_TOP_K", "retrieval.top_k"),
    ("SHELLMASTER_CORPUS", "retrieval.corpus_path"),
    ("SHELLMASTER_RETRY_BUDGET", "pipeline.retry_budget"),
    ("SHELLMASTER_PROBE_TIMEOUT_MS", "scout.probe_timeout_ms"),
    ("SHELLMASTER_RULES", "safety.rules_path"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Failed to write config {path}: {message}")]
    Write { path: String, message: String },
}

/// Generation backend (OpenAI-compatible chat completions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_key")]
    pub api_key: String,

    /// Honour http(s)_proxy variables. Off by default so a local
    /// backend is reached directly.
    #[serde(default)]
    pub use_proxy: bool,
}

fn default_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_model() -> String {
    "Qwen-7B".to_string()
}

fn default_api_key() -> String {
    "EMPTY".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: default_api_key(),
            use_proxy: false,
        }
    }
}

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    /// OpenAI-compatible `/embeddings` endpoint
    #[default]
    Http,
    /// Local feature-hashing embedder (offline, lexical only)
    Hash,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Http => "http",
            EmbeddingKind::Hash => "hash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub kind: EmbeddingKind,

    #[serde(default = "default_base_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_embedding_timeout() -> u64 {
    10
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: EmbeddingKind::default(),
            url: default_base_url(),
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum reference commands per query (valid: 0-20)
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Cosine similarity floor (valid: -1.0..=1.0)
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Corpus file; `.gz` suffix means gzip
    #[serde(default = "default_corpus_path")]
    pub corpus_path: PathBuf,
}

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f32 {
    0.35
}

fn default_corpus_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CORPUS_FILE)
}

impl RetrievalConfig {
    pub fn effective_top_k(&self) -> usize {
        self.top_k.min(20)
    }

    pub fn effective_min_similarity(&self) -> f32 {
        if self.min_similarity.is_nan() {
            return default_min_similarity();
        }
        self.min_similarity.clamp(-1.0, 1.0)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            corpus_path: default_corpus_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Extra generation attempts after a block or backend failure (valid: 0-5)
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    /// Answer trivial requests ("pwd", "whoami") without the backend
    #[serde(default = "default_fast_path")]
    pub fast_path: bool,
}

fn default_retry_budget() -> u32 {
    1
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_fast_path() -> bool {
    true
}

impl PipelineConfig {
    pub fn effective_retry_budget(&self) -> u32 {
        self.retry_budget.min(5)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs.max(1))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            generation_timeout_secs: default_generation_timeout(),
            fast_path: default_fast_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutConfig {
    /// Per-probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

impl ScoutConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Replace the built-in rule set with this TOML file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellmasterConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub scout: ScoutConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl ShellmasterConfig {
    /// Resolve the config file location.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
            .join(CONFIG_FILE)
    }

    /// Load config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_path(&Self::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a specific path; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let config = Self::from_toml_str(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Apply `SHELLMASTER_*` overrides. `lookup` is injected so tests do not
    /// touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, key) in ENV_OVERRIDES {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                self.set(key, &value)?;
            }
        }
        Ok(())
    }

    /// Set one dotted key. Used by env overrides and `sm config --set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "backend.base_url" => self.backend.base_url = value.trim_end_matches('/').to_string(),
            "backend.model" => self.backend.model = value.to_string(),
            "backend.api_key" => self.backend.api_key = value.to_string(),
            "backend.use_proxy" => self.backend.use_proxy = value.parse().map_err(|_| invalid())?,
            "embedding.kind" => {
                self.embedding.kind = match value.to_lowercase().as_str() {
                    "http" => EmbeddingKind::Http,
                    "hash" => EmbeddingKind::Hash,
                    _ => return Err(invalid()),
                }
            }
            "embedding.url" => self.embedding.url = value.trim_end_matches('/').to_string(),
            "embedding.model" => self.embedding.model = value.to_string(),
            "retrieval.top_k" => self.retrieval.top_k = value.parse().map_err(|_| invalid())?,
            "retrieval.min_similarity" => {
                self.retrieval.min_similarity = value.parse().map_err(|_| invalid())?
            }
            "retrieval.corpus_path" => self.retrieval.corpus_path = PathBuf::from(value),
            "pipeline.retry_budget" => {
                self.pipeline.retry_budget = value.parse().map_err(|_| invalid())?
            }
            "pipeline.fast_path" => self.pipeline.fast_path = value.parse().map_err(|_| invalid())?,
            "scout.probe_timeout_ms" => {
                self.scout.probe_timeout_ms = value.parse().map_err(|_| invalid())?
            }
            "safety.rules_path" => self.safety.rules_path = Some(PathBuf::from(value)),
            "log.level" => self.log.level = value.to_string(),
            _ => return Err(invalid()),
        }
        Ok(())
    }

    /// Write this config as TOML, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |message: String| ConfigError::Write {
            path: path.display().to_string(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| write_err(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }
        fs::write(path, content).map_err(|e| write_err(e.to_string()))?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}
