use anyhow::{Context, anyhow};
use async_trait::async_trait;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::blob::FsBlobStore;
use crate::completion::CompletionClient;
use crate::config::Config;
use crate::database::Database;
use crate::embeddings::EmbeddingClient;
use crate::extract::ExtractorRegistry;
use crate::pipeline::{
    CancelFlag, DocumentRequest, Orchestrator, PipelineRun, RunStateStore, RunStatus,
    SqliteRunStore,
};
use crate::retriever::{Retriever, build_prompt_context};
use crate::store::{QueryFilter, open_store};
use crate::{PipelineError, Result};

/// Namespace the CLI indexes all documents under.
const DEFAULT_NAMESPACE: &str = "documents";

/// How many runs `ragpipe runs` shows.
const RUN_LIST_LIMIT: usize = 50;

/// Ingest local files: chunk, embed, and index them as one pipeline run
#[inline]
pub async fn ingest_files(paths: Vec<PathBuf>) -> Result<()> {
    let config = Config::load_default()?;
    let client = connect_embeddings(&config)?;

    info!("Ingesting {} file(s)", paths.len());

    let database = Database::open_in_dir(config.get_base_dir()).await?;
    let store = open_store(&config, DEFAULT_NAMESPACE).await?;

    // Stage the files under the data directory so the pipeline reads
    // them through the blob store like any other source.
    let staging = config
        .get_base_dir()
        .join("staging")
        .join(Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&staging)
        .await
        .with_context(|| format!("Failed to create staging directory: {}", staging.display()))?;

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::Config(format!("not a file: {}", path.display())))?;
        let id = Uuid::new_v4().to_string();

        tokio::fs::copy(&path, staging.join(&id))
            .await
            .with_context(|| format!("Failed to stage {}", path.display()))?;

        documents.push(DocumentRequest {
            id: id.clone(),
            name,
            mime_type: String::new(),
            blob_key: id,
        });
    }

    let bar = if console::user_attended_stderr() {
        ProgressBar::new(STAGE_COUNT).with_style(
            ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    };

    let state: Arc<dyn RunStateStore> = Arc::new(ProgressStore {
        inner: Arc::new(SqliteRunStore::new(database)),
        bar: bar.clone(),
    });

    let orchestrator = Orchestrator::new(
        Arc::new(client),
        Arc::clone(&store),
        Arc::new(FsBlobStore::new(&staging)),
        Arc::new(ExtractorRegistry::with_defaults()),
        state,
        config.chunking.clone(),
    );

    let cancel = CancelFlag::new();
    let signal_cancel = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let outcome = orchestrator.ingest(&documents, &cancel).await;
    signal_task.abort();
    bar.finish_and_clear();

    if let Err(cleanup_error) = tokio::fs::remove_dir_all(&staging).await {
        warn!(
            "Failed to clean staging directory {}: {}",
            staging.display(),
            cleanup_error
        );
    }

    match outcome {
        Ok(run) => {
            println!("✓ Run {} complete", run.id);
            println!("  Documents: {}", documents.len());
            println!("  Vectors in store: {}", store.count().await?);
            Ok(())
        }
        Err(failure) => {
            error!("Ingest failed: {}", failure);
            println!("Ingest failed: {}", failure);
            println!("Use 'ragpipe runs' to inspect the recorded run.");
            Err(failure)
        }
    }
}

/// Retrieve the chunks most similar to a query, without generation
#[inline]
pub async fn query_chunks(text: &str, top_k: usize, doc: Option<String>) -> Result<()> {
    let config = Config::load_default()?;
    let client = EmbeddingClient::new(&config.embedding)?;
    let store = open_store(&config, DEFAULT_NAMESPACE).await?;
    let retriever = Retriever::new(Arc::new(client), store);

    let filter = doc.map(QueryFilter::by_doc_name);
    let retrieval = retriever.retrieve(text, top_k, filter.as_ref()).await?;

    if retrieval.chunks.is_empty() {
        println!("No matching chunks found.");
        println!("Use 'ragpipe ingest <files...>' to index documents first.");
        return Ok(());
    }

    println!(
        "Found {} chunk(s) in {}ms:",
        retrieval.chunks.len(),
        retrieval.query_time_ms
    );
    println!();

    for (index, chunk) in retrieval.chunks.iter().enumerate() {
        println!(
            "[{}] {} #{} (score: {:.3})",
            index + 1,
            chunk.source_doc_name,
            chunk.chunk_index,
            chunk.score
        );
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

/// Answer a question from indexed context, streaming the response
#[inline]
pub async fn ask_question(question: &str, top_k: usize) -> Result<()> {
    let config = Config::load_default()?;
    let embeddings = connect_embeddings(&config)?;
    let completions = CompletionClient::new(&config.completion)?;

    let store = open_store(&config, DEFAULT_NAMESPACE).await?;
    let retriever = Retriever::new(Arc::new(embeddings), store);

    let retrieval = retriever.retrieve(question, top_k, None).await?;
    let context = build_prompt_context(
        &retrieval.chunks,
        question,
        config.completion.max_context_tokens,
    );

    info!(
        "Answering with {} of {} chunk(s), {} context tokens",
        context.chunks_used,
        retrieval.chunks.len(),
        context.context_tokens
    );

    let completion = completions.complete_streaming(&context.prompt, |token| {
        print!("{}", token);
        std::io::stdout().flush().ok();
    })?;
    println!();

    if completion.tokens_used > 0 {
        println!();
        println!("({} tokens used)", completion.tokens_used);
    }

    Ok(())
}

/// List recorded pipeline runs, most recent first
#[inline]
pub async fn list_runs() -> Result<()> {
    let config = Config::load_default()?;
    let database = Database::open_in_dir(config.get_base_dir()).await?;
    let state = SqliteRunStore::new(database);

    let runs = state.list(RUN_LIST_LIMIT).await?;

    if runs.is_empty() {
        println!("No pipeline runs recorded yet.");
        println!("Use 'ragpipe ingest <files...>' to start one.");
        return Ok(());
    }

    println!("Pipeline Runs ({} shown):", runs.len());
    println!();

    for run in &runs {
        println!("{} {}", status_glyph(run.status), run.id);
        println!("   Status: {}", run.status);
        println!("   Documents: {}", run.document_ids.len());
        println!(
            "   Updated: {}",
            run.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(message) = &run.error {
            println!("   ⚠️  Error: {}", message);
        }
        println!();
    }

    let counts = runs.iter().counts_by(|run| run.status);
    let completed = counts.get(&RunStatus::Complete).copied().unwrap_or(0);
    let failed = counts.get(&RunStatus::Error).copied().unwrap_or(0);

    println!("Summary:");
    println!("  Completed: {}", completed);
    println!("  Failed: {}", failed);
    println!("  In Progress: {}", runs.len() - completed - failed);

    Ok(())
}

/// Show one pipeline run in detail, including any recorded error
#[inline]
pub async fn show_run_status(run_id: &str) -> Result<()> {
    let config = Config::load_default()?;
    let database = Database::open_in_dir(config.get_base_dir()).await?;
    let state = SqliteRunStore::new(database);

    let run = state
        .get(run_id)
        .await?
        .ok_or_else(|| PipelineError::Other(anyhow!("Run not found: {run_id}")))?;

    println!("{} Run {}", status_glyph(run.status), run.id);
    println!("   Status: {}", run.status);
    println!("   Documents: {}", run.document_ids.len());
    for document_id in &run.document_ids {
        println!("     - {}", document_id);
    }
    println!(
        "   Created: {}",
        run.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "   Updated: {}",
        run.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(message) = &run.error {
        println!("   ⚠️  Error: {}", message);
    }

    Ok(())
}

/// Delete a run's record and drop the indexed vectors
#[inline]
pub async fn delete_run(run_id: &str, yes: bool) -> Result<()> {
    let config = Config::load_default()?;
    let database = Database::open_in_dir(config.get_base_dir()).await?;
    let state = SqliteRunStore::new(database.clone());

    let run = state
        .get(run_id)
        .await?
        .ok_or_else(|| PipelineError::Other(anyhow!("Run not found: {run_id}")))?;

    println!("Found run: {} ({})", run.id, run.status);
    println!(
        "This drops the vector index for the '{}' namespace and removes the run record.",
        DEFAULT_NAMESPACE
    );

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Delete this run? This action cannot be undone.")
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let store = open_store(&config, DEFAULT_NAMESPACE).await?;
    store.delete_index().await?;
    println!("✓ Vector index dropped");

    if state.delete(run_id).await? {
        println!("✓ Run record deleted");
    }

    database.optimize().await?;
    println!("✓ Database optimized");

    Ok(())
}

fn connect_embeddings(config: &Config) -> Result<EmbeddingClient> {
    let client = EmbeddingClient::new(&config.embedding)?;

    if let Err(failure) = client.health_check() {
        error!("Embedding service health check failed: {}", failure);
        println!(
            "Error: Cannot reach the embedding service at {}:{}",
            config.embedding.host, config.embedding.port
        );
        println!("Please ensure the service is running and accessible.");
        println!("Use 'ragpipe config' to update connection settings.");
        return Err(failure);
    }

    info!(
        "Embedding service healthy at {}:{} with model {}",
        config.embedding.host, config.embedding.port, config.embedding.model
    );

    Ok(client)
}

fn status_glyph(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Complete => "✅",
        RunStatus::Error => "❌",
        _ => "🔄",
    }
}

const STAGE_COUNT: u64 = 6;

// Mirrors run state transitions onto the progress bar as the
// orchestrator persists them.
struct ProgressStore {
    inner: Arc<dyn RunStateStore>,
    bar: ProgressBar,
}

#[async_trait]
impl RunStateStore for ProgressStore {
    async fn put(&self, run: &PipelineRun) -> Result<()> {
        self.bar.set_position(stage_position(run.status));
        self.bar.set_message(run.status.as_str());
        self.inner.put(run).await
    }

    async fn get(&self, id: &str) -> Result<Option<PipelineRun>> {
        self.inner.get(id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        self.inner.list(limit).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }
}

fn stage_position(status: RunStatus) -> u64 {
    match status {
        RunStatus::Pending => 0,
        RunStatus::Downloading => 1,
        RunStatus::Extracting => 2,
        RunStatus::Chunking => 3,
        RunStatus::Embedding => 4,
        RunStatus::Indexing => 5,
        RunStatus::Complete | RunStatus::Error => STAGE_COUNT,
    }
}
