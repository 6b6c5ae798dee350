//! Overlapping, boundary-aware text chunking
//!
//! Windows of `chunk_size` bytes are cut, preferably, at the last paragraph
//! break, sentence end, or space found in the back half of the window.
//! Consecutive windows share `overlap` bytes. Offsets always fall on UTF-8
//! character boundaries.

use crate::{ParserError, Result};
use serde::{Deserialize, Serialize};

/// Sentence terminators considered as cut points, each followed by a space
const SENTENCE_BREAKS: [&str; 3] = [". ", "! ", "? "];

/// Configuration for document chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Target chunk size in bytes
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in bytes
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.overlap >= self.chunk_size {
            return Err(ParserError::InvalidChunkConfig {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// A chunk of text from a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Trimmed chunk content
    pub content: String,

    /// Chunk index within the document
    pub index: u32,

    /// Starting byte offset in the source text
    pub start_offset: usize,

    /// Ending byte offset (exclusive)
    pub end_offset: usize,
}

/// Chunk a text string.
///
/// Empty input yields no chunks; input no longer than `chunk_size` yields a
/// single chunk spanning the whole text. Whitespace-only segments are dropped.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Result<Vec<TextChunk>> {
    config.validate()?;

    let mut chunks = Vec::new();
    let text_len = text.len();
    if text_len == 0 {
        return Ok(chunks);
    }

    if text_len <= config.chunk_size {
        push_chunk(&mut chunks, text, 0, text_len);
        return Ok(chunks);
    }

    let mut start = 0;
    let mut last_end = 0;
    while start < text_len {
        let mut end = floor_boundary(text, (start + config.chunk_size).min(text_len));
        if end <= start {
            end = ceil_boundary(text, start + 1);
        }

        if end < text_len {
            // Cut points must land past the previous window's end
            let window_floor =
                ceil_boundary(text, (start + config.chunk_size / 2).max(last_end + 1));
            if window_floor < end {
                if let Some(cut) = find_break_point(&text[window_floor..end]) {
                    end = window_floor + cut;
                }
            }
        }
        if end <= last_end {
            end = ceil_boundary(text, last_end + 1);
        }
        last_end = end;

        let pushed = push_chunk(&mut chunks, text, start, end);

        if end >= text_len {
            // A whitespace-only tail still belongs to the previous chunk's span
            if !pushed {
                if let Some(last) = chunks.last_mut() {
                    last.end_offset = text_len;
                }
            }
            break;
        }

        let mut next = floor_boundary(text, end.saturating_sub(config.overlap));
        if next <= start {
            next = end;
        }
        start = next;
    }

    tracing::debug!(
        num_chunks = chunks.len(),
        text_length = text_len,
        "text_chunked"
    );

    Ok(chunks)
}

fn push_chunk(chunks: &mut Vec<TextChunk>, text: &str, start: usize, end: usize) -> bool {
    let content = text[start..end].trim();
    if content.is_empty() {
        return false;
    }

    chunks.push(TextChunk {
        content: content.to_string(),
        index: chunks.len() as u32,
        start_offset: start,
        end_offset: end,
    });
    true
}

/// Cut position (relative to `window`) just past the best break, if any
fn find_break_point(window: &str) -> Option<usize> {
    // Look for paragraph break first
    if let Some(pos) = window.rfind("\n\n") {
        return Some(pos + 2);
    }

    // Then the last sentence end
    let sentence_end = SENTENCE_BREAKS
        .iter()
        .filter_map(|pattern| window.rfind(pattern).map(|pos| pos + pattern.len()))
        .max();
    if sentence_end.is_some() {
        return sentence_end;
    }

    // Fall back to a word boundary
    window.rfind(' ').map(|pos| pos + 1)
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

// ============================================================================
// Tests
// ============================================================================
