use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chat model used by `llm_chat` steps. Without it those steps fail as unconfigured.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(default)]
    pub fallback_models: Vec<ModelConfig>,
    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Directory of `<id>.json` workflow definitions. Default: <workspace>/workflows
    #[serde(default)]
    pub workflows_dir: Option<String>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            workflows_dir: None,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_workspace() -> String { "~/.weft".to_string() }
fn default_event_capacity() -> usize { 256 }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// SQLite file for runs and knowledge bases. Default: <workspace>/weft.db
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.7 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Embedding provider used by knowledge retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "openai", "ollama", or any OpenAI-compatible API.
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
}

fn default_embedding_dims() -> usize { 1536 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Fallback for `http_request` steps that set no `timeout`.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_http_timeout() -> u64 { 30 }
fn default_user_agent() -> String { format!("weft/{}", env!("CARGO_PKG_VERSION")) }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Upper bound on interpreted operations per script.
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "default_script_timeout")]
    pub timeout_secs: u64,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            timeout_secs: default_script_timeout(),
        }
    }
}

fn default_max_operations() -> u64 { 1_000_000 }
fn default_script_timeout() -> u64 { 30 }

/// Per-run JSONL logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: <workspace>/logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// 1 = run summary only, 2 = + step results, 3 = + step start and skip (default: 2).
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: None,
            level: default_log_level(),
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse TOML text after expanding `${ENV_VAR}` references.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        expand_home(&self.engine.workspace)
    }

    pub fn workflows_dir(&self) -> PathBuf {
        match &self.engine.workflows_dir {
            Some(dir) => expand_home(dir),
            None => self.workspace_dir().join("workflows"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        match &self.storage.database {
            Some(path) => expand_home(path),
            None => self.workspace_dir().join("weft.db"),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        match &self.log.log_dir {
            Some(dir) => expand_home(dir),
            None => self.workspace_dir().join("logs"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Unset variables stay as written; workflow JSON uses the same syntax.
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
