//! Docsight RAG - Retrieval-augmented question answering and document analysis
//!
//! This crate ties the vector index and embedding service to text generation:
//! - Question answering over one document's chunks
//! - Summaries, risk reports, comparisons and key-information extraction
//! - Resilient generation with response caching, retries and offline fallback
//! - Lenient JSON recovery for model output
//!
//! Author: hephaex@gmail.com

use docsight_core::{
    AppConfig, CacheStats, ChunkId, ChunkRecord, ChunkingConfig, DocsightError, DocumentId,
    Result,
};
use docsight_parser::{chunk_text, ChunkConfig, ParserError};
use docsight_vector::{EmbeddingService, IndexStats, VectorIndex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub mod cache;
pub mod fallback;
pub mod generator;
pub mod llm;
pub mod parser;
pub mod prompts;

pub use cache::ResponseCache;
pub use fallback::{offline_response, PromptKind};
pub use generator::{GenerateOptions, Generated, GenerationError, Origin, ResilientGenerator};
pub use llm::{create_llm_client, OllamaClient, OpenAiClient};
pub use parser::{
    parse_json_response, validate_comparison, validate_risks, validate_summary,
    ComparisonReport, RiskReport, SummaryReport,
};
pub use prompts::ExtractionKind;

/// Answer given when retrieval finds nothing usable
pub const NOT_FOUND_ANSWER: &str =
    "I couldn't find relevant information in the document to answer your question.";

const SOURCE_PREVIEW_CHARS: usize = 200;
const SUMMARY_MAX_CHARS: usize = 12_000;
const ANALYSIS_MAX_CHARS: usize = 10_000;
const COMPARISON_MAX_CHARS: usize = 5_000;

// ============================================================================
// Result types
// ============================================================================

/// A retrieved chunk cited by an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub chunk_id: ChunkId,
    pub chunk_index: u32,

    /// First characters of the chunk
    pub content: String,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
}

impl Answer {
    fn not_found() -> Self {
        Self {
            answer: NOT_FOUND_ANSWER.to_string(),
            sources: Vec::new(),
        }
    }
}

/// A document taking part in a comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedDocument {
    pub name: String,
    pub text: String,
}

impl NamedDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Diagnostics across the index and both caches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub index: IndexStats,
    pub embedding_cache: CacheStats,
    pub response_cache: CacheStats,
}

// ============================================================================
// Helpers
// ============================================================================

fn char_to_byte(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(byte, _)| byte)
}

fn char_slice(text: &str, from: usize, to: usize) -> &str {
    &text[char_to_byte(text, from)..char_to_byte(text, to)]
}

/// Shorten `text` to roughly `max_chars` characters.
///
/// Keeps the beginning, middle and end thirds so the model still sees the
/// whole arc of a long document.
pub fn smart_truncate(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let third = max_chars / 3;
    let mid = total / 2;
    format!(
        "{}\n\n[...middle section...]\n\n{}\n\n[...end section...]\n\n{}",
        char_slice(text, 0, third),
        char_slice(text, mid - third / 2, mid + third / 2),
        char_slice(text, total - third, total),
    )
}

fn preview(content: &str) -> String {
    content.chars().take(SOURCE_PREVIEW_CHARS).collect()
}

fn parser_error(err: ParserError) -> DocsightError {
    match err {
        ParserError::IoError { .. } => DocsightError::Persistence(err.to_string()),
        other => DocsightError::Validation(other.to_string()),
    }
}

/// Chunk a document into records with ids assigned from `first_chunk_id`
pub fn chunk_document(
    text: &str,
    config: &ChunkingConfig,
    first_chunk_id: ChunkId,
) -> Result<Vec<ChunkRecord>> {
    let chunk_config = ChunkConfig::new(config.chunk_size, config.overlap).map_err(parser_error)?;
    let chunks = chunk_text(text, &chunk_config).map_err(parser_error)?;

    Ok(chunks
        .into_iter()
        .zip(first_chunk_id..)
        .map(|(chunk, id)| ChunkRecord::new(id, chunk.index, chunk.content))
        .collect())
}

// ============================================================================
// RAG service
// ============================================================================

/// Retrieval orchestrator and document analysis operations
pub struct RagService {
    embeddings: EmbeddingService,
    index: Arc<VectorIndex>,
    generator: ResilientGenerator,
}

impl RagService {
    pub fn new(
        embeddings: EmbeddingService,
        index: Arc<VectorIndex>,
        generator: ResilientGenerator,
    ) -> Self {
        Self {
            embeddings,
            index,
            generator,
        }
    }

    /// Build every component from application config, loading the index
    /// from disk when a path is configured
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let embeddings = EmbeddingService::from_config(config)?;
        let index = Arc::new(VectorIndex::open(config.index.clone()));
        let generator = ResilientGenerator::from_config(config)?;

        tracing::info!(
            embedding_dimension = embeddings.dimension(),
            llm_configured = generator.is_configured(),
            "rag_service_ready"
        );
        Ok(Self::new(embeddings, index, generator))
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn generator(&self) -> &ResilientGenerator {
        &self.generator
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    /// Embed a document's chunks and add them to the index
    pub async fn index_document(
        &self,
        document_id: DocumentId,
        chunks: &[ChunkRecord],
    ) -> Result<Vec<u64>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embeddings.embed_texts(&texts).await?;
        let chunk_ids: Vec<ChunkId> = chunks.iter().map(|c| c.id).collect();
        let chunk_indices: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();

        let ids = self
            .index
            .add(document_id, &chunk_ids, &chunk_indices, &vectors)?;
        tracing::info!(document_id, chunks = ids.len(), "document_indexed");
        Ok(ids)
    }

    /// Remove a document's vectors, returning how many were removed
    pub fn remove_document(&self, document_id: DocumentId) -> Result<usize> {
        self.index.delete_document(document_id)
    }

    /// Answer a question from one document's chunks.
    ///
    /// `chunks` is the caller's record of the document; hits whose chunk id is
    /// not in it are ignored. Answers are never served from the response cache.
    pub async fn answer(
        &self,
        question: &str,
        document_id: DocumentId,
        chunks: &[ChunkRecord],
        top_k: usize,
    ) -> Result<Answer> {
        let query = self.embeddings.embed_query(question).await?;
        let hits = self.index.search(&query, top_k, Some(document_id))?;

        let by_id: HashMap<ChunkId, &ChunkRecord> = chunks.iter().map(|c| (c.id, c)).collect();
        let retrieved: Vec<_> = hits
            .iter()
            .filter_map(|hit| by_id.get(&hit.chunk_id).map(|chunk| (hit, *chunk)))
            .collect();

        if retrieved.is_empty() {
            tracing::info!(document_id, hits = hits.len(), "no_relevant_chunks");
            return Ok(Answer::not_found());
        }

        let context = retrieved
            .iter()
            .map(|(_, chunk)| format!("[Chunk {}]: {}", chunk.chunk_index + 1, chunk.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = prompts::qa_prompt(&context, question);
        let answer = self
            .generator
            .generate(&prompt, &GenerateOptions::uncached())
            .await;

        let sources = retrieved
            .iter()
            .map(|(hit, chunk)| Source {
                chunk_id: chunk.id,
                chunk_index: chunk.chunk_index,
                content: preview(&chunk.content),
                relevance_score: hit.score,
            })
            .collect();

        tracing::info!(document_id, sources = retrieved.len(), "question_answered");
        Ok(Answer { answer, sources })
    }

    /// Executive summary, section summaries, highlights and takeaways
    pub async fn summarize(&self, text: &str) -> SummaryReport {
        let prompt = prompts::summary_prompt(&smart_truncate(text, SUMMARY_MAX_CHARS));
        let response = self
            .generator
            .generate(&prompt, &GenerateOptions::default())
            .await;

        let default = json!({
            "executive_summary": response,
            "section_summaries": [],
            "bullet_highlights": [],
            "key_takeaways": [],
        });
        validate_summary(&parse_json_response(&response, Some(default)))
    }

    pub async fn detect_risks(&self, text: &str) -> RiskReport {
        let prompt = prompts::risk_prompt(&smart_truncate(text, ANALYSIS_MAX_CHARS));
        let response = self
            .generator
            .generate(&prompt, &GenerateOptions::default())
            .await;

        let default = json!({
            "overall_risk_score": "Medium",
            "risk_items": [],
        });
        validate_risks(&parse_json_response(&response, Some(default)))
    }

    /// Compare two or more documents
    pub async fn compare_documents(&self, documents: &[NamedDocument]) -> Result<ComparisonReport> {
        if documents.len() < 2 {
            return Err(DocsightError::Validation(format!(
                "Comparison needs at least two documents, got {}",
                documents.len()
            )));
        }

        let joined = documents
            .iter()
            .map(|doc| {
                format!(
                    "DOCUMENT: {}\n{}",
                    doc.name,
                    smart_truncate(&doc.text, COMPARISON_MAX_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = prompts::comparison_prompt(&joined);
        let response = self
            .generator
            .generate(&prompt, &GenerateOptions::default())
            .await;

        let default = json!({
            "summary": response,
            "similarities": [],
            "differences": [],
        });
        Ok(validate_comparison(&parse_json_response(
            &response,
            Some(default),
        )))
    }

    /// Key fields for the given document type, as returned by the model
    pub async fn extract_key_info(&self, text: &str, kind: ExtractionKind) -> Value {
        let prompt = prompts::extraction_prompt(kind, &smart_truncate(text, ANALYSIS_MAX_CHARS));
        let response = self
            .generator
            .generate(&prompt, &GenerateOptions::default())
            .await;
        parse_json_response(&response, None)
    }

    pub fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            index: self.index.stats()?,
            embedding_cache: self.embeddings.cache_stats()?,
            response_cache: self.generator.cache_stats()?,
        })
    }
}

impl std::fmt::Debug for RagService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagService")
            .field("index", &self.index)
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smart_truncate_short_text_untouched() {
        assert_eq!(smart_truncate("short", 100), "short");
    }

    #[test]
    fn test_smart_truncate_keeps_three_sections() {
        let text: String = ('a'..='z').cycle().take(300).collect();
        let out = smart_truncate(&text, 30);

        let parts: Vec<&str> = out
            .split("\n\n[...middle section...]\n\n")
            .flat_map(|part| part.split("\n\n[...end section...]\n\n"))
            .collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], &text[..10]);
        assert_eq!(parts[1], &text[145..155]);
        assert_eq!(parts[2], &text[290..]);
    }

    #[test]
    fn test_smart_truncate_multibyte() {
        let text = "가나다라마바사아자차카타파하".repeat(10);
        let out = smart_truncate(&text, 9);
        assert!(out.starts_with("가나다"));
        assert!(out.ends_with("타파하"));
    }

    #[test]
    fn test_chunk_document_assigns_ids() {
        let config = ChunkingConfig {
            chunk_size: 10,
            overlap: 2,
        };
        let records = chunk_document("one two three four five six", &config, 100).unwrap();
        assert!(records.len() > 1);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.id, 100 + i as u64);
            assert_eq!(record.chunk_index, i as u32);
        }
    }

    #[test]
    fn test_chunk_document_rejects_bad_config() {
        let config = ChunkingConfig {
            chunk_size: 10,
            overlap: 10,
        };
        assert!(matches!(
            chunk_document("text", &config, 0),
            Err(DocsightError::Validation(_))
        ));
    }

    #[test]
    fn test_preview_is_char_bounded() {
        let content = "é".repeat(300);
        assert_eq!(preview(&content).chars().count(), SOURCE_PREVIEW_CHARS);
    }
}
