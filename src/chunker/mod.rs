// Chunking module
// Splits document text into bounded, overlapping windows with exact offsets


use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::{PipelineError, Result};

/// A bounded, offset-addressable window of a source document.
///
/// Offsets are character offsets into the source text; `text` always equals
/// the source characters in `start_offset..end_offset`, so a chunk can be
/// reconstructed from the document without storing anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier for this chunk
    pub id: String,
    /// The chunk text, whitespace-trimmed at both edges
    pub text: String,
    /// ID of the document this chunk was cut from
    pub source_doc_id: String,
    /// Human-readable name of the source document
    pub source_doc_name: String,
    /// Position of this chunk within the document, starting at 0
    pub index: usize,
    /// Character offset of the first character of `text`
    pub start_offset: usize,
    /// Character offset one past the last character of `text`
    pub end_offset: usize,
    /// Number of characters shared with the preceding chunk
    pub overlap_with_previous: usize,
}

/// Window size settings for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window length in characters
    pub chunk_size: usize,
    /// Characters carried over from the end of one window into the next
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

impl ChunkingConfig {
    /// Check that the window arithmetic is well-formed.
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(PipelineError::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split a document's text into overlapping chunks.
///
/// The text is walked in a sliding window of `chunk_size` characters. Each
/// window prefers to end on the nearest preceding paragraph break, sentence
/// end, or word boundary, in that order, rather than an exact character cut;
/// the search never goes back past the window start. The next window starts
/// `overlap` characters before the previous window's chosen end. Whitespace
/// is trimmed from both edges of every chunk and the recorded offsets reflect
/// the trimmed extents. Windows that are whitespace-only, or that end inside
/// the previous chunk and so would add no new text, produce no chunk.
#[inline]
pub fn chunk_document(
    text: &str,
    doc_id: &str,
    doc_name: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();

    if total == 0 {
        return Ok(chunks);
    }

    let mut start = 0;
    let mut index = 0;
    let mut prev_end: Option<usize> = None;

    while start < total {
        let raw_end = (start + config.chunk_size).min(total);

        // The final window runs to the end of the text; cutting it at a
        // boundary would orphan the tail.
        let end = if raw_end < total {
            find_boundary(&chars, start, raw_end)
        } else {
            raw_end
        };

        let window = trim_window(&chars, start, end)
            .filter(|&(_, trimmed_end)| prev_end.is_none_or(|previous| trimmed_end > previous));

        if let Some((trimmed_start, trimmed_end)) = window {
            let chunk_text: String = chars
                .get(trimmed_start..trimmed_end)
                .unwrap_or_default()
                .iter()
                .collect();
            let overlap_with_previous =
                prev_end.map_or(0, |previous| previous.saturating_sub(trimmed_start));

            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                text: chunk_text,
                source_doc_id: doc_id.to_string(),
                source_doc_name: doc_name.to_string(),
                index,
                start_offset: trimmed_start,
                end_offset: trimmed_end,
                overlap_with_previous,
            });

            index += 1;
            prev_end = Some(trimmed_end);
        }

        if raw_end >= total {
            break;
        }

        // Overlap is measured from the chosen end, not the raw cut. When the
        // boundary landed so close to the window start that stepping back by
        // the overlap would not advance, skip the overlap instead of stalling.
        start = if end > config.overlap && end - config.overlap > start {
            end - config.overlap
        } else {
            end
        };
    }

    debug!(
        "Chunked document '{}' ({} chars) into {} chunks",
        doc_name,
        total,
        chunks.len()
    );

    Ok(chunks)
}

/// Find the best end position for a window over `(start, raw_end]`.
///
/// Boundary preference: paragraph break, then sentence end, then word
/// boundary, then the raw cut. Positions are exclusive chunk ends.
fn find_boundary(chars: &[char], start: usize, raw_end: usize) -> usize {
    if let Some(end) = find_paragraph_break(chars, start, raw_end) {
        return end;
    }
    if let Some(end) = find_sentence_end(chars, start, raw_end) {
        return end;
    }
    if let Some(end) = find_word_boundary(chars, start, raw_end) {
        return end;
    }
    raw_end
}

/// Latest position in `(start, raw_end]` preceded by a blank line.
fn find_paragraph_break(chars: &[char], start: usize, raw_end: usize) -> Option<usize> {
    (start + 2..=raw_end)
        .rev()
        .find(|&pos| chars[pos - 1] == '\n' && chars[pos - 2] == '\n')
}

/// Latest position in `(start, raw_end]` just after sentence punctuation
/// that is followed by whitespace or the end of the text.
fn find_sentence_end(chars: &[char], start: usize, raw_end: usize) -> Option<usize> {
    (start + 1..=raw_end).rev().find(|&pos| {
        matches!(chars[pos - 1], '.' | '!' | '?')
            && chars.get(pos).is_none_or(|next| next.is_whitespace())
    })
}

/// Latest position in `(start, raw_end]` just after a whitespace character.
fn find_word_boundary(chars: &[char], start: usize, raw_end: usize) -> Option<usize> {
    (start + 1..=raw_end)
        .rev()
        .find(|&pos| chars[pos - 1].is_whitespace())
}

/// Trim whitespace from both edges of `[start, end)`, returning the trimmed
/// extents or `None` when nothing but whitespace remains.
fn trim_window(chars: &[char], start: usize, end: usize) -> Option<(usize, usize)> {
    let mut trimmed_start = start;
    let mut trimmed_end = end;

    while trimmed_start < trimmed_end && chars[trimmed_start].is_whitespace() {
        trimmed_start += 1;
    }
    while trimmed_end > trimmed_start && chars[trimmed_end - 1].is_whitespace() {
        trimmed_end -= 1;
    }

    (trimmed_start < trimmed_end).then_some((trimmed_start, trimmed_end))
}

/// Estimate token count using a fixed four-characters-per-token ratio.
///
/// This is a rough approximation; actual tokenization depends on the model.
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
