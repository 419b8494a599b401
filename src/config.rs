//! Configuration management
//!
//! A typed, immutable snapshot of user preferences loaded from
//! `config.yaml` under the base path. Missing keys fall back to
//! defaults, so partial files written by older versions keep working.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Semantic search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Master toggle for vector search and anything LLM-backed
    pub enabled: bool,
    /// Embedding provider to load: "tfidf" or "openai"
    pub provider: String,
    /// Default cosine similarity floor for vector search
    pub threshold: f32,
    /// Embedding model name override (remote providers)
    pub model: Option<String>,
    /// Environment variable holding the provider API key
    pub api_key_env: String,
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
    /// Embedding dimensions (must match the provider's output)
    pub dimension: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "tfidf".to_string(),
            threshold: 0.7,
            model: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            dimension: 384,
        }
    }
}

/// LLM configuration for summarization (compaction).
///
/// Reuses the semantic provider credentials with a different model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat model used for compaction summaries
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
        }
    }
}

/// Autosave configuration.
///
/// `on_task_complete`, `session_summary`, and
/// `summary_interval_messages` are advisory hints surfaced in startup
/// output; the calling agent is responsible for honoring them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub enabled: bool,
    pub on_task_complete: bool,
    pub on_remember_request: bool,
    pub session_summary: bool,
    pub summary_interval_messages: u32,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on_task_complete: true,
            on_remember_request: true,
            session_summary: true,
            summary_interval_messages: 20,
        }
    }
}

/// Startup behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub auto_load_pinned: bool,
    pub ask_load_previous_session: bool,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            auto_load_pinned: true,
            ask_load_previous_session: true,
        }
    }
}

/// Memory expiration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationConfig {
    pub enabled: bool,
    pub default_days: i64,
    /// Per-category overrides; None means never expire
    pub categories: HashMap<String, Option<i64>>,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        let mut categories = HashMap::new();
        categories.insert("task_history".to_string(), Some(30));
        categories.insert("session_summary".to_string(), Some(60));
        categories.insert("factual".to_string(), None);
        categories.insert("decision".to_string(), None);
        Self {
            enabled: false,
            default_days: 90,
            categories,
        }
    }
}

impl ExpirationConfig {
    /// Expiration days for a category, honoring per-category overrides.
    pub fn days_for(&self, category: &str) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        match self.categories.get(category) {
            Some(days) => *days,
            None => Some(self.default_days),
        }
    }
}

/// Relevance scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub search_limit: usize,
    pub include_global: bool,
    pub access_weight: f32,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            search_limit: 5,
            include_global: true,
            access_weight: 0.1,
        }
    }
}

/// Hooks configuration for agent integrations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HooksConfig {
    pub error_nudge: bool,
}

/// Main configuration object
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Storage root; resolved from the environment, never serialized
    #[serde(skip)]
    pub base_path: PathBuf,
    pub semantic: SemanticConfig,
    pub llm: LlmConfig,
    pub autosave: AutosaveConfig,
    pub startup: StartupConfig,
    pub expiration: ExpirationConfig,
    pub relevance: RelevanceConfig,
    pub hooks: HooksConfig,
}

impl Config {
    /// Path to global memory storage
    pub fn global_path(&self) -> PathBuf {
        self.base_path.join("global")
    }

    /// Path to per-project memory storage
    pub fn projects_path(&self) -> PathBuf {
        self.base_path.join("projects")
    }

    /// Path to the configuration file
    pub fn config_file(&self) -> PathBuf {
        self.base_path.join("config.yaml")
    }
}

/// Resolve the storage base path: `AGENT_MEMORY_PATH` if set, else
/// `$HOME/.agent-memory`.
pub fn default_base_path() -> PathBuf {
    if let Ok(env_path) = std::env::var("AGENT_MEMORY_PATH") {
        if !env_path.is_empty() {
            return PathBuf::from(shellexpand::tilde(&env_path).into_owned());
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agent-memory")
}

/// Ensure the storage directory skeleton exists.
pub fn ensure_directories(base_path: &Path) -> Result<()> {
    std::fs::create_dir_all(base_path)?;
    std::fs::create_dir_all(base_path.join("global").join("summaries"))?;
    std::fs::create_dir_all(base_path.join("projects"))?;
    Ok(())
}

/// Load configuration from `config.yaml`, creating a default file on
/// first use.
pub fn load_config(base_path: Option<PathBuf>) -> Result<Config> {
    let base_path = base_path.unwrap_or_else(default_base_path);
    ensure_directories(&base_path)?;

    let config_file = base_path.join("config.yaml");
    let mut config: Config = if config_file.exists() {
        let raw = std::fs::read_to_string(&config_file)?;
        serde_yaml::from_str(&raw)?
    } else {
        let config = Config::default();
        save_config(&config_file, &config)?;
        config
    };

    config.base_path = base_path;
    Ok(config)
}

/// Write a configuration snapshot to disk.
pub fn save_config(config_file: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = config_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_yaml::to_string(config)?;
    std::fs::write(config_file, raw)?;
    Ok(())
}

/// Update a single configuration value by dotted key path (e.g.
/// `semantic.enabled`) and return the reloaded configuration.
///
/// String values are coerced: "true"/"on"/"yes" and "false"/"off"/"no"
/// become booleans, numeric strings become numbers.
pub fn update_config(config: &Config, key_path: &str, value: &str) -> Result<Config> {
    let config_file = config.config_file();

    let mut data: serde_yaml::Value = if config_file.exists() {
        let raw = std::fs::read_to_string(&config_file)?;
        serde_yaml::from_str(&raw)?
    } else {
        serde_yaml::to_value(Config::default())?
    };

    let keys: Vec<&str> = key_path.split('.').collect();
    if keys.is_empty() || keys.iter().any(|k| k.is_empty()) {
        return Err(MemoryError::InvalidInput(format!(
            "Invalid config key path: {}",
            key_path
        )));
    }

    let mut current = &mut data;
    for key in &keys[..keys.len() - 1] {
        if !current.is_mapping() {
            *current = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        let map = current.as_mapping_mut().expect("mapping ensured above");
        let entry = serde_yaml::Value::String((*key).to_string());
        current = map
            .entry(entry)
            .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    }

    let last = keys[keys.len() - 1];
    if !current.is_mapping() {
        *current = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    current
        .as_mapping_mut()
        .expect("mapping ensured above")
        .insert(serde_yaml::Value::String(last.to_string()), coerce_value(value));

    let raw = serde_yaml::to_string(&data)?;
    std::fs::write(&config_file, raw)?;

    load_config(Some(config.base_path.clone()))
}

fn coerce_value(value: &str) -> serde_yaml::Value {
    match value.to_lowercase().as_str() {
        "true" | "on" | "yes" => return serde_yaml::Value::Bool(true),
        "false" | "off" | "no" => return serde_yaml::Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = value.parse::<i64>() {
        return serde_yaml::Value::Number(i.into());
    }
    if let Ok(f) = value.parse::<f64>() {
        return serde_yaml::Value::Number(serde_yaml::Number::from(f));
    }
    serde_yaml::Value::String(value.to_string())
}
