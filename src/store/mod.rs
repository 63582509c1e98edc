// Vector store module
// One capability interface over interchangeable backends. Callers never
// special-case a backend: each one provisions a namespaced collection,
// validates dimensions before writing, and returns cosine-scored results
// in descending order with ties broken by insertion order.


pub mod lance;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::database::Database;
use crate::{PipelineError, Result};

pub use lance::LanceStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Stored form of an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// Metadata stored alongside a vector, returned verbatim with query
/// results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// The chunk text this vector was produced from.
    pub text: String,
    pub source_doc_id: String,
    pub source_doc_name: String,
    pub chunk_index: usize,
    /// Caller-supplied key-value pairs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// One query match. `score` is cosine similarity in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub id: String,
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// Equality filter restricting the candidate set before scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub source_doc_id: Option<String>,
    pub source_doc_name: Option<String>,
}

impl QueryFilter {
    #[inline]
    pub fn by_doc_id(id: impl Into<String>) -> Self {
        Self {
            source_doc_id: Some(id.into()),
            source_doc_name: None,
        }
    }

    #[inline]
    pub fn by_doc_name(name: impl Into<String>) -> Self {
        Self {
            source_doc_id: None,
            source_doc_name: Some(name.into()),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.source_doc_id.is_none() && self.source_doc_name.is_none()
    }

    #[inline]
    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        self.source_doc_id
            .as_ref()
            .is_none_or(|id| metadata.source_doc_id == *id)
            && self
                .source_doc_name
                .as_ref()
                .is_none_or(|name| metadata.source_doc_name == *name)
    }
}

/// Capability interface implemented by every backend.
#[async_trait]
pub trait VectorStore: std::fmt::Debug + Send + Sync {
    /// Backend name for logging and error messages.
    fn name(&self) -> &'static str;

    /// Namespace isolating this store's collection.
    fn namespace(&self) -> &str;

    /// Dimension every stored vector must have.
    fn dimension(&self) -> usize;

    /// Idempotent setup of the underlying collection. Safe to call
    /// multiple times.
    async fn provision(&self) -> Result<()>;

    /// Write vectors, replacing records with matching ids. A dimension
    /// mismatch in any record fails the whole call before anything is
    /// written.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Return at most `top_k` results ordered by descending similarity,
    /// ties broken by insertion order.
    async fn query(
        &self,
        values: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<QueryResult>>;

    /// Remove every record in this store's namespace. Idempotent.
    async fn delete_index(&self) -> Result<()>;

    /// Number of records in this store's namespace.
    async fn count(&self) -> Result<usize>;
}

/// Cosine similarity of two vectors. A zero-norm vector yields 0.0, not
/// an error or NaN.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

/// Fail if any record's vector does not match the expected dimension.
/// Called by every backend before it writes anything.
pub(crate) fn ensure_dimensions(expected: usize, records: &[VectorRecord]) -> Result<()> {
    for record in records {
        if record.values.len() != expected {
            return Err(PipelineError::DimensionMismatch {
                expected,
                actual: record.values.len(),
            });
        }
    }
    Ok(())
}

/// Sort scored results descending. The sort is stable, so candidates
/// must already be in insertion order for ties to resolve correctly.
pub(crate) fn sort_by_score(results: &mut [QueryResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Build the configured vector store backend for one namespace.
///
/// The namespace isolates one logical collection per pipeline or tenant,
/// so unrelated runs never share a similarity search space.
#[inline]
pub async fn open_store(config: &Config, namespace: &str) -> Result<Arc<dyn VectorStore>> {
    if namespace.trim().is_empty() {
        return Err(PipelineError::StoreUnconfigured(
            "store namespace must not be empty".to_string(),
        ));
    }
    if config.embedding.dimension == 0 {
        return Err(PipelineError::StoreUnconfigured(
            "embedding dimension must be configured".to_string(),
        ));
    }

    let dimension = config.embedding.dimension;

    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(namespace, dimension))),
        StoreBackend::Sqlite => {
            let database = Database::open_in_dir(&config.base_dir)
                .await
                .map_err(|error| PipelineError::StoreUnconfigured(error.to_string()))?;
            Ok(Arc::new(SqliteStore::new(
                database,
                namespace,
                dimension,
                config.store.scan_limit,
                config.store.upsert_batch_size,
            )))
        }
        StoreBackend::Lance => {
            let store = LanceStore::connect(
                &config.vector_database_path(),
                namespace,
                dimension,
                config.store.upsert_batch_size,
            )
            .await?;
            Ok(Arc::new(store))
        }
    }
}
