// Retriever module
// Embeds a query, searches the vector store, and assembles a
// token-budgeted prompt from the best matches.


use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::Result;
use crate::chunker::estimate_token_count;
use crate::embeddings::EmbeddingClient;
use crate::store::{QueryFilter, QueryResult, VectorStore};

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant. Answer the question using only \
the provided context. If the context does not contain the answer, say that you do not know.";

/// One match returned to callers, annotated with its originating text.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub source_doc_id: String,
    pub source_doc_name: String,
    pub chunk_index: usize,
}

impl From<QueryResult> for RetrievedChunk {
    #[inline]
    fn from(result: QueryResult) -> Self {
        Self {
            id: result.id,
            text: result.metadata.text,
            score: result.score,
            source_doc_id: result.metadata.source_doc_id,
            source_doc_name: result.metadata.source_doc_name,
            chunk_index: result.metadata.chunk_index,
        }
    }
}

/// Result of one retrieval pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub chunks: Vec<RetrievedChunk>,
    /// Wall-clock time for the whole pass, query embedding included.
    pub query_time_ms: u64,
}

/// A prompt assembled from retrieved chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub prompt: String,
    /// How many chunks fit within the context budget.
    pub chunks_used: usize,
    /// Estimated token count of the context section alone.
    pub context_tokens: u32,
}

pub struct Retriever {
    embeddings: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    #[inline]
    pub fn new(embeddings: Arc<EmbeddingClient>, store: Arc<dyn VectorStore>) -> Self {
        Self { embeddings, store }
    }

    /// Embed `query` and return the `top_k` most similar chunks.
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Retrieval> {
        let started = Instant::now();

        let query_vector = self.embeddings.embed_one(query)?;
        let matches = self.store.query(&query_vector.values, top_k, filter).await?;
        let chunks: Vec<RetrievedChunk> = matches.into_iter().map(RetrievedChunk::from).collect();

        let query_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(
            "Retrieved {} chunks in {}ms from {} store",
            chunks.len(),
            query_time_ms,
            self.store.name()
        );

        Ok(Retrieval {
            chunks,
            query_time_ms,
        })
    }
}

/// Assemble a prompt from `chunks`, highest score first, stopping before
/// any chunk that would push the context past `max_context_tokens`.
/// Chunks are never truncated mid-text. Pure given its inputs.
#[inline]
pub fn build_prompt_context(
    chunks: &[RetrievedChunk],
    query: &str,
    max_context_tokens: u32,
) -> PromptContext {
    let mut ordered: Vec<&RetrievedChunk> = chunks.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut context = String::new();
    let mut context_tokens = 0u32;
    let mut chunks_used = 0usize;

    for (index, chunk) in ordered.iter().enumerate() {
        let block = format!(
            "[{}] {} (score: {:.3})\n{}\n\n",
            index + 1,
            chunk.source_doc_name,
            chunk.score,
            chunk.text
        );
        let block_tokens = u32::try_from(estimate_token_count(&block)).unwrap_or(u32::MAX);
        if context_tokens.saturating_add(block_tokens) > max_context_tokens {
            break;
        }

        context.push_str(&block);
        context_tokens = context_tokens.saturating_add(block_tokens);
        chunks_used += 1;
    }

    let mut prompt = String::new();
    prompt.push_str(SYSTEM_INSTRUCTION);
    prompt.push_str("\n\nContext:\n");
    if context.is_empty() {
        prompt.push_str("(no relevant context found)\n\n");
    } else {
        prompt.push_str(&context);
    }
    prompt.push_str("Question: ");
    prompt.push_str(query);
    prompt.push_str("\n\nAnswer:");

    PromptContext {
        prompt,
        chunks_used,
        context_tokens,
    }
}
