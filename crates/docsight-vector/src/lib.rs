//! Docsight Vector - In-process vector search
//!
//! Stores chunk embeddings and answers similarity queries:
//! - `VectorIndex`: flat/clustered index with a dense id map, persisted to
//!   `<path>.index` and `<path>.map.json`
//! - Embedding clients (OpenAI, Ollama, local feature hashing)
//! - `EmbeddingCache` and `EmbeddingService` for cached query embedding
//!
//! Author: hephaex@gmail.com

pub mod cache;
pub mod embedding;
pub mod index;
pub mod kmeans;
pub mod service;

pub use cache::EmbeddingCache;
pub use embedding::{
    create_embedding_client, EmbeddingClient, HashEmbedding, OllamaEmbedding, OpenAiEmbedding,
};
pub use index::{IndexEntry, IndexStats, IndexStructure, StructureKind, VectorIndex};
pub use service::EmbeddingService;
