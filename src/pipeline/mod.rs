// Pipeline orchestration module
// Drives a run through download, extract, chunk, embed, and index
// stages, persisting the run snapshot before each stage's work begins.


pub mod state;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::chunker::{Chunk, chunk_document};
use crate::config::ChunkingSettings;
use crate::embeddings::{EmbeddingClient, EmbeddingVector};
use crate::extract::ExtractorRegistry;
use crate::store::{RecordMetadata, VectorRecord, VectorStore};
use crate::{PipelineError, Result};

pub use state::{MemoryRunStore, RunStateStore, SqliteRunStore};

/// Stage a pipeline run is in. Runs move forward only; `Complete` and
/// `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Downloading,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Complete,
    Error,
}

impl RunStatus {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexing => "indexing",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    #[inline]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "extracting" => Some(Self::Extracting),
            "chunking" => Some(Self::Chunking),
            "embedding" => Some(Self::Embedding),
            "indexing" => Some(Self::Indexing),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    fn order(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Extracting => 2,
            Self::Chunking => 3,
            Self::Embedding => 4,
            Self::Indexing => 5,
            Self::Complete => 6,
            Self::Error => 7,
        }
    }

    /// Whether `next` is a legal transition from this state.
    #[inline]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Error {
            return true;
        }
        next.order() > self.order()
    }
}

impl fmt::Display for RunStatus {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One end-to-end pipeline execution over a set of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub status: RunStatus,
    pub document_ids: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    #[inline]
    pub fn new(id: impl Into<String>, document_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: RunStatus::Pending,
            document_ids,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting backward or post-terminal transitions.
    #[inline]
    pub fn advance(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::Other(anyhow!(
                "invalid transition from {} to {} for run {}",
                self.status,
                next,
                self.id
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Record a failure. Does nothing if the run already finished.
    #[inline]
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Error;
        self.error = Some(message.into());
        self.touch();
    }

    // `updated_at` must strictly increase on every transition, even when
    // two transitions land within one clock tick.
    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::milliseconds(1)
        };
    }
}

/// One document for the pipeline to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub id: String,
    pub name: String,
    /// Mime type of the stored blob; may be empty, in which case the
    /// extractor registry resolves it from the file name.
    pub mime_type: String,
    /// Key under which the blob store holds the raw bytes.
    pub blob_key: String,
}

/// Cooperative cancellation signal, checked between stages.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives pipeline runs. All collaborators are injected at
/// construction; the orchestrator holds no global state.
pub struct Orchestrator {
    embeddings: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    blobs: Arc<dyn BlobStore>,
    extractors: Arc<ExtractorRegistry>,
    state: Arc<dyn RunStateStore>,
    chunking: ChunkingSettings,
}

impl Orchestrator {
    #[inline]
    pub fn new(
        embeddings: Arc<EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        blobs: Arc<dyn BlobStore>,
        extractors: Arc<ExtractorRegistry>,
        state: Arc<dyn RunStateStore>,
        chunking: ChunkingSettings,
    ) -> Self {
        Self {
            embeddings,
            store,
            blobs,
            extractors,
            state,
            chunking,
        }
    }

    /// Process `documents` end to end as one new run.
    ///
    /// On failure the error is recorded on the persisted run and then
    /// returned; failed runs are never retried automatically.
    #[inline]
    pub async fn ingest(
        &self,
        documents: &[DocumentRequest],
        cancel: &CancelFlag,
    ) -> Result<PipelineRun> {
        if documents.is_empty() {
            return Err(PipelineError::Config(
                "at least one document is required".to_string(),
            ));
        }

        let document_ids = documents.iter().map(|d| d.id.clone()).collect();
        let mut run = PipelineRun::new(Uuid::new_v4().to_string(), document_ids);
        self.state.put(&run).await?;
        info!(
            "Starting run {} with {} document(s)",
            run.id,
            documents.len()
        );

        let started = Instant::now();
        match self.execute(&mut run, documents, cancel).await {
            Ok(()) => {
                info!(
                    "Run {} complete in {}ms",
                    run.id,
                    started.elapsed().as_millis()
                );
                Ok(run)
            }
            Err(failure) => {
                self.record_failure(&mut run, &failure).await;
                Err(failure)
            }
        }
    }

    async fn execute(
        &self,
        run: &mut PipelineRun,
        documents: &[DocumentRequest],
        cancel: &CancelFlag,
    ) -> Result<()> {
        ensure_active(cancel, RunStatus::Downloading)?;
        self.advance(run, RunStatus::Downloading).await?;
        let mut payloads = Vec::with_capacity(documents.len());
        for document in documents {
            payloads.push(self.blobs.get(&document.blob_key).await?);
        }

        ensure_active(cancel, RunStatus::Extracting)?;
        self.advance(run, RunStatus::Extracting).await?;
        let mut texts = Vec::with_capacity(documents.len());
        for (document, bytes) in documents.iter().zip(&payloads) {
            texts.push(
                self.extractors
                    .extract(bytes, &document.mime_type, &document.name)?,
            );
        }

        // Documents are chunked sequentially into one combined set so the
        // embedding and indexing stages run once per run, not per document.
        ensure_active(cancel, RunStatus::Chunking)?;
        self.advance(run, RunStatus::Chunking).await?;
        let mut chunks = Vec::new();
        for (document, text) in documents.iter().zip(&texts) {
            let config = self.chunking.config_for_length(text.chars().count());
            let document_chunks = chunk_document(text, &document.id, &document.name, &config)?;
            debug!(
                "Chunked '{}' into {} chunk(s)",
                document.name,
                document_chunks.len()
            );
            chunks.extend(document_chunks);
        }
        info!(
            "Run {}: {} chunk(s) from {} document(s)",
            run.id,
            chunks.len(),
            documents.len()
        );

        ensure_active(cancel, RunStatus::Embedding)?;
        self.advance(run, RunStatus::Embedding).await?;
        let embedded = self.embeddings.embed_chunks(&chunks)?;
        if !embedded.failures.is_empty() {
            let failed: Vec<&str> = embedded
                .failures
                .iter()
                .map(|failure| failure.id.as_str())
                .take(5)
                .collect();
            return Err(PipelineError::Embedding(format!(
                "failed to embed {} of {} chunks ({})",
                embedded.failures.len(),
                chunks.len(),
                failed.join(", ")
            )));
        }

        ensure_active(cancel, RunStatus::Indexing)?;
        self.advance(run, RunStatus::Indexing).await?;
        self.store.provision().await?;
        let records = correlate(&chunks, embedded.vectors)?;
        self.store.upsert(&records).await?;

        self.advance(run, RunStatus::Complete).await?;
        Ok(())
    }

    // Persisting the transition before the stage's work keeps polled
    // snapshots consistent with what has actually happened.
    async fn advance(&self, run: &mut PipelineRun, next: RunStatus) -> Result<()> {
        run.advance(next)?;
        self.state.put(run).await?;
        debug!("Run {} entered {}", run.id, next);
        Ok(())
    }

    async fn record_failure(&self, run: &mut PipelineRun, failure: &PipelineError) {
        let stage = run.status;
        error!("Run {} failed during {}: {}", run.id, stage, failure);

        let message = match failure {
            PipelineError::Cancelled(detail) => format!("cancelled {detail}"),
            other => format!("{stage} stage failed: {other}"),
        };
        run.fail(message);

        if let Err(persist_error) = self.state.put(run).await {
            warn!(
                "Failed to record error on run {}: {}",
                run.id, persist_error
            );
        }
    }
}

fn ensure_active(cancel: &CancelFlag, next: RunStatus) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled(format!("before {next} stage")));
    }
    Ok(())
}

/// Pair each embedded vector with its source chunk by id, never by call
/// order.
fn correlate(chunks: &[Chunk], vectors: Vec<EmbeddingVector>) -> Result<Vec<VectorRecord>> {
    let by_id: HashMap<&str, &Chunk> = chunks
        .iter()
        .map(|chunk| (chunk.id.as_str(), chunk))
        .collect();

    let mut records = Vec::with_capacity(vectors.len());
    for vector in vectors {
        let chunk = vector
            .chunk_id
            .as_deref()
            .and_then(|chunk_id| by_id.get(chunk_id).copied())
            .ok_or_else(|| {
                PipelineError::Embedding(
                    "embedded vector has no matching source chunk".to_string(),
                )
            })?;

        records.push(VectorRecord {
            id: chunk.id.clone(),
            values: vector.values,
            metadata: RecordMetadata {
                text: chunk.text.clone(),
                source_doc_id: chunk.source_doc_id.clone(),
                source_doc_name: chunk.source_doc_name.clone(),
                chunk_index: chunk.index,
                extra: BTreeMap::new(),
            },
        });
    }
    Ok(records)
}
