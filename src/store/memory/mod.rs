// In-memory vector store
// Brute-force cosine scan over a Vec kept in insertion order. Used by
// tests and as the zero-setup backend for small corpora.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    QueryFilter, QueryResult, VectorRecord, VectorStore, cosine_similarity, ensure_dimensions,
    sort_by_score,
};
use crate::{PipelineError, Result};

#[derive(Debug)]
pub struct MemoryStore {
    namespace: String,
    dimension: usize,
    records: RwLock<Vec<VectorRecord>>,
}

impl MemoryStore {
    #[inline]
    pub fn new(namespace: impl Into<String>, dimension: usize) -> Self {
        Self {
            namespace: namespace.into(),
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn provision(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        ensure_dimensions(self.dimension, records)?;

        let mut stored = self.records.write().await;
        for record in records {
            // Replacing in place keeps the original insertion order.
            match stored.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }

        debug!(
            "Upserted {} records into memory store '{}' ({} total)",
            records.len(),
            self.namespace,
            stored.len()
        );
        Ok(())
    }

    async fn query(
        &self,
        values: &[f32],
        top_k: usize,
        filter: Option<&QueryFilter>,
    ) -> Result<Vec<QueryResult>> {
        if values.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: values.len(),
            });
        }

        let stored = self.records.read().await;

        let mut results: Vec<QueryResult> = stored
            .iter()
            .filter(|record| filter.is_none_or(|f| f.matches(&record.metadata)))
            .map(|record| QueryResult {
                id: record.id.clone(),
                score: cosine_similarity(values, &record.values),
                metadata: record.metadata.clone(),
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    async fn delete_index(&self) -> Result<()> {
        let mut stored = self.records.write().await;
        let removed = stored.len();
        stored.clear();

        debug!(
            "Cleared memory store '{}' ({} records removed)",
            self.namespace, removed
        );
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}
