//! Configuration loading and management for Oxbow.
//!
//! Loads `config.toml` from the working directory (or an explicit path)
//! with environment variable overrides. Every field has a default, so a
//! missing file is not an error — the service starts with a usable
//! configuration and logs a warning.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// The root configuration structure. Maps directly to `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub tool_validation: ToolValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard ceiling on reasoning-loop iterations per request.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    6
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Chat endpoint URL.
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Model used when the per-request override is absent.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Models exposed to clients (informational).
    #[serde(default)]
    pub models: Vec<String>,

    /// HTTP call timeout for LLM requests.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ollama_url() -> String {
    "http://localhost:11434/api/chat".into()
}
fn default_model() -> String {
    "qwen2.5-coder:3b".into()
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            default_model: default_model(),
            models: vec![],
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Suggested subscriber filter; the library crates never install one.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the session store and its snapshot.
    #[serde(default = "default_memory_path")]
    pub memory_path: String,

    /// Base directory for the vector document log.
    #[serde(default = "default_memory_path")]
    pub vector_path: String,
}

fn default_memory_path() -> String {
    "./memory_store".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_path: default_memory_path(),
            vector_path: default_memory_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Path appended to the Ollama host for embedding calls.
    #[serde(default = "default_embedding_api_path")]
    pub api_path: String,
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn default_embedding_api_path() -> String {
    "/api/embeddings".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            api_path: default_embedding_api_path(),
        }
    }
}

/// Resource envelope for the code-runner sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_concurrency")]
    pub max_concurrency: usize,

    /// Default execution timeout in seconds.
    #[serde(default = "default_sandbox_timeout")]
    pub default_timeout: u64,

    /// Maximum allowed execution timeout in seconds.
    #[serde(default = "default_sandbox_max_timeout")]
    pub max_timeout: u64,

    #[serde(default = "default_sandbox_memory_mb")]
    pub memory_mb: u64,

    #[serde(default = "default_sandbox_cpu_quota")]
    pub cpu_quota: f64,
}

fn default_sandbox_concurrency() -> usize {
    5
}
fn default_sandbox_timeout() -> u64 {
    60
}
fn default_sandbox_max_timeout() -> u64 {
    300
}
fn default_sandbox_memory_mb() -> u64 {
    256
}
fn default_sandbox_cpu_quota() -> f64 {
    0.5
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_sandbox_concurrency(),
            default_timeout: default_sandbox_timeout(),
            max_timeout: default_sandbox_max_timeout(),
            memory_mb: default_sandbox_memory_mb(),
            cpu_quota: default_sandbox_cpu_quota(),
        }
    }
}

/// Keyword lists consulted by the heuristic tool-call validator.
///
/// A tool absent from the map is rejected outright, so the defaults cover
/// every built-in tool in the languages the service is deployed for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolValidationConfig {
    #[serde(default = "default_validation_keywords")]
    pub keywords: HashMap<String, Vec<String>>,
}

impl Default for ToolValidationConfig {
    fn default() -> Self {
        Self {
            keywords: default_validation_keywords(),
        }
    }
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn default_validation_keywords() -> HashMap<String, Vec<String>> {
    let file_words = keywords(&[
        "file", "read", "write", "save", "open", "path", "tệp", "đọc", "ghi", "lưu", "mở",
        "đường dẫn", "文件", "读取", "写入", "保存", "路径", "打开",
    ]);
    let search_words = keywords(&[
        "search", "find", "what is", "how to", "who is", "tell me about", "tìm", "là gì",
        "hướng dẫn", "ai là", "kể cho tôi về", "搜索", "查找", "是什么", "如何", "谁是",
        "告诉我关于",
    ]);
    let session_words = keywords(&[
        "session", "conversation", "chat", "topic", "switch", "hội thoại", "chủ đề",
        "trò chuyện", "chuyển", "会话", "聊天", "主题", "切换",
    ]);

    let mut map = HashMap::new();
    map.insert("read_file".to_string(), file_words.clone());
    map.insert("write_file".to_string(), file_words);
    map.insert(
        "run_code".to_string(),
        keywords(&[
            "run", "execute", "code", "script", "chạy", "thực thi", "mã", "运行", "执行",
            "代码", "开发", "写", "编写", "implement", "develop", "write",
        ]),
    );
    map.insert("git_cmd".to_string(), keywords(&["git", "commit", "diff", "log", "branch"]));
    map.insert("web_search".to_string(), search_words.clone());
    map.insert("knowledge_search".to_string(), search_words);
    map.insert("create_session".to_string(), session_words.clone());
    map.insert("switch_session".to_string(), session_words);
    map
}

/// Error from loading or parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl AppConfig {
    /// Load configuration from `config.toml` in the working directory,
    /// falling back to defaults when the file is absent, then apply
    /// environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(Path::new("config.toml"))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields defaults; a file
    /// that exists but fails to parse is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Environment variable overrides (highest priority):
    /// `OXBOW_OLLAMA_URL`, `OXBOW_OLLAMA_MODEL`, `OXBOW_MEMORY_PATH`,
    /// `OXBOW_VECTOR_PATH`, `OXBOW_LOG_LEVEL`, `OXBOW_MAX_ITERATIONS`.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OXBOW_OLLAMA_URL") {
            self.ollama.url = url;
        }
        if let Ok(model) = std::env::var("OXBOW_OLLAMA_MODEL") {
            self.ollama.default_model = model;
        }
        if let Ok(path) = std::env::var("OXBOW_MEMORY_PATH") {
            self.storage.memory_path = path;
        }
        if let Ok(path) = std::env::var("OXBOW_VECTOR_PATH") {
            self.storage.vector_path = path;
        }
        if let Ok(level) = std::env::var("OXBOW_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Ok(iters) = std::env::var("OXBOW_MAX_ITERATIONS") {
            match iters.parse() {
                Ok(n) => self.agent.max_iterations = n,
                Err(_) => warn!(value = %iters, "Ignoring invalid OXBOW_MAX_ITERATIONS"),
            }
        }
    }
}
