//! Embedding service: backend client plus query cache

use crate::cache::EmbeddingCache;
use crate::embedding::{create_embedding_client, EmbeddingClient, HashEmbedding};
use docsight_core::{AppConfig, CacheStats, DocsightError, EmbeddingProvider, Result};
use std::sync::Arc;

/// Embeds queries through the cache and document chunks in batches
pub struct EmbeddingService {
    client: Arc<dyn EmbeddingClient>,
    cache: EmbeddingCache,
    batch_size: usize,
}

impl EmbeddingService {
    pub fn new(client: Arc<dyn EmbeddingClient>, cache_size: usize) -> Self {
        Self {
            client,
            cache: EmbeddingCache::new(cache_size),
            batch_size: 64,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Build from application config.
    ///
    /// An OpenAI provider without a usable credential degrades to the local
    /// hashing embedder.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client: Arc<dyn EmbeddingClient> = if config.embedding.provider
            == EmbeddingProvider::OpenAI
            && !config.llm.is_configured()
        {
            tracing::warn!(
                dimension = config.embedding.dimension,
                "embedding_backend_unconfigured_using_hashing"
            );
            Arc::new(HashEmbedding::new(config.embedding.dimension))
        } else {
            Arc::from(create_embedding_client(&config.embedding, &config.llm)?)
        };

        Ok(Self::new(client, config.cache.embedding_max_size)
            .with_batch_size(config.embedding.batch_size))
    }

    pub fn dimension(&self) -> usize {
        self.client.dimension()
    }

    /// Embed a query, served from the cache when possible
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.cache
            .get_or_compute(text, || self.client.embed(text))
            .await
    }

    /// Embed document chunks in batches, bypassing the cache
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.client.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(DocsightError::Backend(format!(
                    "Embedding backend returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            embeddings.extend(vectors);
        }

        tracing::debug!(count = texts.len(), "texts_embedded");
        Ok(embeddings)
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats()
    }
}
