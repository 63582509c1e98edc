// Run state persistence
// Keyed by run id; the orchestrator writes a full snapshot before each
// stage so observers always see a consistent run.


use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{PipelineRun, RunStatus};
use crate::database::Database;
use crate::{PipelineError, Result};

/// Persistence for [`PipelineRun`] snapshots.
///
/// Writers are expected to serialize updates per run id; two concurrent
/// writers to the same run are a caller error.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Insert or fully replace the run snapshot. `created_at` is kept
    /// from the first insert.
    async fn put(&self, run: &PipelineRun) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<PipelineRun>>;

    /// Most recently created runs first.
    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>>;

    /// Returns whether a run was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// In-memory run state, for tests and ephemeral pipelines.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<String, PipelineRun>>,
}

impl MemoryRunStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStateStore for MemoryRunStore {
    async fn put(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        let mut snapshot = run.clone();
        if let Some(existing) = runs.get(&run.id) {
            snapshot.created_at = existing.created_at;
        }
        runs.insert(run.id.clone(), snapshot);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let runs = self.runs.read().await;
        let mut all: Vec<PipelineRun> = runs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        all.truncate(limit);
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.runs.write().await.remove(id).is_some())
    }
}

/// Run state persisted in the metadata database.
pub struct SqliteRunStore {
    database: Database,
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: String,
    status: String,
    document_ids: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn run_from_row(row: RunRow) -> Result<PipelineRun> {
    let status = RunStatus::parse(&row.status).ok_or_else(|| {
        PipelineError::Database(format!(
            "unknown status '{}' for run {}",
            row.status, row.id
        ))
    })?;

    let document_ids: Vec<String> = serde_json::from_str(&row.document_ids).map_err(|error| {
        PipelineError::Database(format!("corrupt document list for run {}: {error}", row.id))
    })?;

    Ok(PipelineRun {
        id: row.id,
        status,
        document_ids,
        error: row.error,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

impl SqliteRunStore {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RunStateStore for SqliteRunStore {
    async fn put(&self, run: &PipelineRun) -> Result<()> {
        let document_ids = serde_json::to_string(&run.document_ids).map_err(|error| {
            PipelineError::Database(format!("failed to encode document list: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO pipeline_runs (id, status, document_ids, error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = excluded.status, \
                 document_ids = excluded.document_ids, \
                 error = excluded.error, \
                 updated_at = excluded.updated_at",
        )
        .bind(run.id.as_str())
        .bind(run.status.as_str())
        .bind(document_ids.as_str())
        .bind(run.error.as_deref())
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(self.database.pool())
        .await
        .map_err(|error| PipelineError::Database(format!("failed to save run state: {error}")))?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PipelineRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT id, status, document_ids, error, created_at, updated_at \
             FROM pipeline_runs WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.database.pool())
        .await
        .map_err(|error| PipelineError::Database(format!("failed to load run state: {error}")))?;

        row.map(run_from_row).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT id, status, document_ids, error, created_at, updated_at \
             FROM pipeline_runs ORDER BY created_at DESC, id LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.database.pool())
        .await
        .map_err(|error| PipelineError::Database(format!("failed to list runs: {error}")))?;

        rows.into_iter().map(run_from_row).collect()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipeline_runs WHERE id = ?")
            .bind(id)
            .execute(self.database.pool())
            .await
            .map_err(|error| {
                PipelineError::Database(format!("failed to delete run state: {error}"))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
