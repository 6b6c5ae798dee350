//! Docsight Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Credential value shipped in sample env files; never treated as a real key
const PLACEHOLDER_API_KEY: &str = "sk-your-openai-api-key-here";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Generation backend configuration
    pub llm: LlmConfig,

    /// Embedding backend configuration
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    pub index: IndexConfig,

    /// Embedding and response cache sizing
    pub cache: CacheConfig,

    /// Chunking parameters
    pub chunking: ChunkingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // LLM
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_API_BASE") {
            self.llm.base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.llm.ollama_url = url.clone();
            self.embedding.ollama_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(timeout) = parse_env("LLM_TIMEOUT")? {
            self.llm.timeout_secs = timeout;
        }
        if let Some(retries) = parse_env("LLM_MAX_RETRIES")? {
            self.llm.max_retries = retries;
        }

        // Embeddings
        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(dimension) = parse_env("EMBEDDING_DIMENSION")? {
            self.embedding.dimension = dimension;
        }

        // Index
        if let Ok(path) = std::env::var("INDEX_PATH") {
            self.index.path = Some(PathBuf::from(path));
        }

        // Caches
        if let Some(size) = parse_env("EMBEDDING_CACHE_SIZE")? {
            self.cache.embedding_max_size = size;
        }
        if let Some(size) = parse_env("LLM_CACHE_MAX_SIZE")? {
            self.cache.response_max_size = size;
        }
        if let Some(ttl) = parse_env("LLM_CACHE_TTL")? {
            self.cache.response_ttl_secs = ttl;
        }

        // Chunking
        if let Some(size) = parse_env("CHUNK_SIZE")? {
            self.chunking.chunk_size = size;
        }
        if let Some(overlap) = parse_env("CHUNK_OVERLAP")? {
            self.chunking.overlap = overlap;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Generation backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend provider to use
    pub provider: LlmProvider,

    /// API key for OpenAI-compatible endpoints
    pub api_key: Option<String>,

    /// Alternate base endpoint for OpenAI-compatible gateways (OpenRouter, self-hosted)
    pub base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retries after the first failed attempt
    pub max_retries: u32,
}

impl LlmConfig {
    /// Whether a usable backend is configured.
    ///
    /// OpenAI-compatible providers need a real credential; without one the
    /// generation layer runs in offline-fallback mode.
    pub fn is_configured(&self) -> bool {
        match self.provider {
            LlmProvider::Ollama => true,
            LlmProvider::OpenAI => self
                .api_key
                .as_deref()
                .map(|key| {
                    let key = key.trim();
                    !key.is_empty() && key != PLACEHOLDER_API_KEY && key.len() > 10
                })
                .unwrap_or(false),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            api_key: None,
            base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 2000,
            temperature: 0.1,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Supported generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding provider
    pub provider: EmbeddingProvider,

    /// Embedding model name
    pub model: String,

    /// Ollama server URL
    pub ollama_url: String,

    /// Vector dimension for the hashing embedder
    pub dimension: usize,

    /// Batch size for document chunk embedding
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            model: "text-embedding-3-small".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            dimension: 384,
            batch_size: 64,
        }
    }
}

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAI,
    Ollama,
    /// Deterministic local feature hashing, no network
    Hashing,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "hashing" | "hash" | "local" => Ok(Self::Hashing),
            _ => Err(ConfigError::InvalidValue {
                key: "EMBEDDING_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Artifact base path; `<path>.index` and `<path>.map.json` are written.
    /// `None` keeps the index in memory only.
    pub path: Option<PathBuf>,

    /// Vector count at which the flat index is promoted to a clustered one
    pub promotion_threshold: usize,

    /// Upper bound on the number of clusters
    pub max_nlist: usize,

    /// Upper bound on clusters probed per query
    pub max_nprobe: usize,

    /// Candidate multiplier for document-filtered search
    pub filter_overfetch: usize,

    /// Lloyd iterations when training clusters
    pub kmeans_iterations: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("./data/faiss_index")),
            promotion_threshold: 256,
            max_nlist: 64,
            max_nprobe: 10,
            filter_overfetch: 5,
            kmeans_iterations: 20,
        }
    }
}

impl IndexConfig {
    /// In-memory index with default tuning
    pub fn in_memory() -> Self {
        Self {
            path: None,
            ..Self::default()
        }
    }
}

/// Cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached query embeddings
    pub embedding_max_size: usize,

    /// Maximum number of cached generated responses
    pub response_max_size: usize,

    /// Time-to-live for cached responses (in seconds)
    pub response_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_max_size: 512,
            response_max_size: 256,
            response_ttl_secs: 3600,
        }
    }
}

/// Chunking parameters, measured in bytes of UTF-8 text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 200);
        assert_eq!(config.cache.embedding_max_size, 512);
        assert_eq!(config.cache.response_max_size, 256);
        assert_eq!(config.cache.response_ttl_secs, 3600);
        assert_eq!(config.index.promotion_threshold, 256);
        assert_eq!(config.llm.max_retries, 2);
    }

    #[test]
    fn test_llm_provider_parse() {
        assert_eq!(
            "openai".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAI
        );
        assert_eq!(
            "Ollama".parse::<LlmProvider>().unwrap(),
            LlmProvider::Ollama
        );
        assert!("invalid".parse::<LlmProvider>().is_err());
        // Compatible gateways go through `openai` with a base URL
        assert!("azure".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_embedding_provider_parse() {
        assert_eq!(
            "hash".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Hashing
        );
        assert!("bert".parse::<EmbeddingProvider>().is_err());
    }

    #[test]
    fn test_llm_is_configured() {
        let mut config = LlmConfig::default();
        assert!(!config.is_configured());

        config.api_key = Some(PLACEHOLDER_API_KEY.to_string());
        assert!(!config.is_configured());

        config.api_key = Some("short".to_string());
        assert!(!config.is_configured());

        config.api_key = Some("sk-live-0123456789abcdef".to_string());
        assert!(config.is_configured());

        let ollama = LlmConfig {
            provider: LlmProvider::Ollama,
            ..LlmConfig::default()
        };
        assert!(ollama.is_configured());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[chunking]\nchunk_size = 500\noverlap = 50\n\n[cache]\nresponse_ttl_secs = 60"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 50);
        assert_eq!(config.cache.response_ttl_secs, 60);
        assert_eq!(config.cache.response_max_size, 256);
    }

    #[test]
    fn test_from_file_missing() {
        let err = AppConfig::from_file("/nonexistent/docsight.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
