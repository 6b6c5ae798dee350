//! Embedding clients for turning text into vectors
//!
//! Supports OpenAI-compatible and Ollama embedding APIs, plus a local
//! feature-hashing embedder used when no backend is configured.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use docsight_core::{DocsightError, EmbeddingConfig, EmbeddingProvider, LlmConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

/// OpenAI-compatible embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "text-embedding-3-large" => 3072,
            // text-embedding-3-small, text-embedding-ada-002 and unknown models
            _ => 1536,
        };

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model,
            dimension,
        }
    }

    /// Point the client at an alternate OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn from_config(embedding: &EmbeddingConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = llm
            .api_key
            .as_ref()
            .filter(|_| llm.is_configured())
            .ok_or_else(|| DocsightError::Config("OpenAI API key required".to_string()))?;

        let client = Self::new(api_key.clone(), embedding.model.clone());
        Ok(match &llm.base_url {
            Some(url) => client.with_base_url(url.clone()),
            None => client,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| DocsightError::Backend("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocsightError::Backend(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DocsightError::Backend(format!(
                "OpenAI embedding error: {error_text}"
            )));
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            DocsightError::Backend(format!("Failed to parse embedding response: {e}"))
        })?;

        if result.data.len() != texts.len() {
            return Err(DocsightError::Backend(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        let mut embeddings = result.data;
        embeddings.sort_by_key(|e| e.index);
        Ok(embeddings.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = match model.as_str() {
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 768,
        };

        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            dimension,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(config.ollama_url.clone(), config.model.clone())
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| DocsightError::Backend(format!("Ollama embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DocsightError::Backend(format!(
                "Ollama embedding error: {error_text}"
            )));
        }

        let result: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            DocsightError::Backend(format!("Failed to parse embedding response: {e}"))
        })?;

        Ok(result.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // No native batch endpoint
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Hashing embedder
// ============================================================================

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

/// Offline embedder: signed FNV-1a hashes of character 3- and 4-grams,
/// accumulated into buckets and L2 normalized
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
    ngram_range: (usize, usize),
}

impl HashEmbedding {
    /// Zero is bumped to one dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            ngram_range: (3, 4),
        }
    }

    /// Embed synchronously; empty text maps to the zero vector
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for n in self.ngram_range.0..=self.ngram_range.1 {
            if n > chars.len() {
                continue;
            }
            for window in chars.windows(n) {
                let ngram: String = window.iter().collect();
                let hash = fnv1a(ngram.as_bytes());
                let bucket = (hash % self.dimension as u64) as usize;
                let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign;
            }
        }

        crate::kmeans::l2_normalize(&mut vector);
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl EmbeddingClient for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from config
pub fn create_embedding_client(
    embedding: &EmbeddingConfig,
    llm: &LlmConfig,
) -> Result<Box<dyn EmbeddingClient>> {
    match embedding.provider {
        EmbeddingProvider::OpenAI => Ok(Box::new(OpenAiEmbedding::from_config(embedding, llm)?)),
        EmbeddingProvider::Ollama => Ok(Box::new(OllamaEmbedding::from_config(embedding))),
        EmbeddingProvider::Hashing => Ok(Box::new(HashEmbedding::new(embedding.dimension))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmeans::dot;

    #[test]
    fn test_openai_dimension() {
        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-small");
        assert_eq!(client.dimension(), 1536);

        let client = OpenAiEmbedding::new("test-key", "text-embedding-3-large");
        assert_eq!(client.dimension(), 3072);
    }

    #[test]
    fn test_openai_base_url_override() {
        let client = OpenAiEmbedding::new("k", "m").with_base_url("https://gateway.local/v1/");
        assert_eq!(client.base_url, "https://gateway.local/v1");
    }

    #[test]
    fn test_ollama_dimension() {
        let client = OllamaEmbedding::new("http://localhost:11434", "nomic-embed-text");
        assert_eq!(client.dimension(), 768);

        let client = OllamaEmbedding::new("http://localhost:11434", "mxbai-embed-large");
        assert_eq!(client.dimension(), 1024);
    }

    #[test]
    fn test_hash_embedding_normalized_and_deterministic() {
        let embedder = HashEmbedding::new(64);
        let v = embedder.embed_text("termination for convenience");
        assert_eq!(v.len(), 64);
        assert!((dot(&v, &v).sqrt() - 1.0).abs() < 1e-4);
        assert_eq!(v, embedder.embed_text("termination for convenience"));
    }

    #[test]
    fn test_hash_embedding_similarity() {
        let embedder = HashEmbedding::new(256);
        let a = embedder.embed_text("payment terms net thirty days");
        let b = embedder.embed_text("payment terms are net thirty days");
        let c = embedder.embed_text("zebra xylophone quartz");
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn test_hash_embedding_empty_text() {
        let v = HashEmbedding::new(16).embed_text("");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_factory_requires_credential_for_openai() {
        let embedding = EmbeddingConfig {
            provider: EmbeddingProvider::OpenAI,
            ..EmbeddingConfig::default()
        };
        let llm = LlmConfig::default();
        assert!(matches!(
            create_embedding_client(&embedding, &llm),
            Err(DocsightError::Config(_))
        ));

        let hashing = EmbeddingConfig::default();
        let client = create_embedding_client(&hashing, &llm).unwrap();
        assert_eq!(client.dimension(), 384);
    }
}
