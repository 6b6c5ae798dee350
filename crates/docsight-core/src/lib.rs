//! Docsight Core - Shared types, errors, and traits
//!
//! This crate defines the abstractions used throughout docsight:
//! - Common error taxonomy
//! - Identifiers, chunk records and search hits exchanged between crates
//! - Text fingerprinting for cache keys
//! - Configuration management
//! - The `LlmClient` backend trait
//!
//! Author: hephaex@gmail.com

pub mod config;

pub use config::{
    AppConfig, CacheConfig, ChunkingConfig, ConfigError, EmbeddingConfig, EmbeddingProvider,
    IndexConfig, LlmConfig, LlmProvider, LoggingConfig,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for docsight operations
#[derive(Error, Debug)]
pub enum DocsightError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Index rebuild failed: {0}")]
    Rebuild(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for DocsightError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DocsightError>;

// ============================================================================
// Identifiers and records
// ============================================================================

/// Identifier of a source document, assigned by the caller
pub type DocumentId = u64;

/// Identifier of a chunk, assigned by the caller and stable for the chunk's lifetime
pub type ChunkId = u64;

/// A chunk as handed to the retrieval layer by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable chunk identifier
    pub id: ChunkId,

    /// Position of the chunk within its document
    pub chunk_index: u32,

    /// Text content
    pub content: String,
}

impl ChunkRecord {
    /// Create a new chunk record
    pub fn new(id: ChunkId, chunk_index: u32, content: impl Into<String>) -> Self {
        Self {
            id,
            chunk_index,
            content: content.into(),
        }
    }
}

/// A ranked hit returned by vector search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: DocumentId,
    pub chunk_id: ChunkId,
    pub chunk_index: u32,

    /// Cosine similarity (inner product of normalized vectors)
    pub score: f32,
}

/// Read-only cache diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl CacheStats {
    /// Build a report, deriving the hit rate from the counters
    pub fn new(size: usize, max_size: usize, hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };

        Self {
            size,
            max_size,
            hits,
            misses,
            hit_rate,
        }
    }
}

// ============================================================================
// Fingerprinting
// ============================================================================

/// SHA-256 fingerprint of raw text, hex encoded
///
/// Used as the cache key for both embedding lookups and generated responses.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for text generation backends
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate a streaming response
    async fn generate_stream(
        &self,
        prompt: &str,
    ) -> Result<futures::stream::BoxStream<'static, Result<String>>>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = fingerprint("What is the termination clause?");
        let b = fingerprint("What is the termination clause?");
        let c = fingerprint("What is the termination clause");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats::new(3, 10, 1, 3);
        assert!((stats.hit_rate - 0.25).abs() < f64::EPSILON);

        let empty = CacheStats::new(0, 10, 0, 0);
        assert_eq!(empty.hit_rate, 0.0);
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = DocsightError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: index expects 384, got 768"
        );
    }

    struct EchoLlm;

    #[async_trait::async_trait]
    impl LlmClient for EchoLlm {
        async fn generate(&self, prompt: &str) -> Result<String> {
            Ok(prompt.to_uppercase())
        }

        async fn generate_stream(
            &self,
            prompt: &str,
        ) -> Result<futures::stream::BoxStream<'static, Result<String>>> {
            let words: Vec<Result<String>> =
                prompt.split_whitespace().map(|w| Ok(w.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(words)))
        }
    }

    #[test]
    fn test_llm_client_as_trait_object() {
        use futures::StreamExt;

        let client: Box<dyn LlmClient> = Box::new(EchoLlm);
        let text = tokio_test::block_on(client.generate("net 30")).unwrap();
        assert_eq!(text, "NET 30");

        let parts: Vec<String> = tokio_test::block_on(async {
            let stream = client.generate_stream("net 30 days").await.unwrap();
            stream.map(|part| part.unwrap()).collect().await
        });
        assert_eq!(parts, vec!["net", "30", "days"]);
    }

    #[test]
    fn test_chunk_record_roundtrips_through_json() {
        let chunk = ChunkRecord::new(7, 2, "Payment is due within 30 days.");
        let json = serde_json::to_string(&chunk).unwrap();
        let back: ChunkRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }
}
