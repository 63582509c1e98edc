// SQLite vector store
// Vectors live in the metadata database as little-endian f32 blobs;
// similarity is a brute-force cosine scan over a bounded candidate set
// read back in rowid (insertion) order.


use async_trait::async_trait;
use sqlx::Sqlite;
use tracing::{debug, warn};

use super::{
    QueryFilter, QueryResult, RecordMetadata, VectorRecord, VectorStore, cosine_similarity,
    ensure_dimensions, sort_by_score,
};
use crate::database::Database;
use crate::{PipelineError, Result};

#[derive(Debug)]
pub struct SqliteStore {
    database: Database,
    namespace: String,
    dimension: usize,
    scan_limit: usize,
    upsert_batch_size: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct VectorRow {
    id: String,
    vector: Vec<u8>,
    text: String,
    source_doc_id: String,
    source_doc_name: String,
    chunk_index: i64,
    extra: Option<String>,
}

/// A record with its column values pre-encoded for binding.
struct EncodedRow<'a> {
    record: &'a VectorRecord,
    vector: Vec<u8>,
    chunk_index: i64,
    extra: Option<String>,
}

fn encode_values(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_values(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(PipelineError::Store(format!(
            "corrupt vector blob of {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

impl SqliteStore {
    #[inline]
    pub fn new(
        database: Database,
        namespace: impl Into<String>,
        dimension: usize,
        scan_limit: usize,
        upsert_batch_size: usize,
    ) -> Self {
        Self {
            database,
            namespace: namespace.into(),
            dimension,
            scan_limit: scan_limit.max(1),
            upsert_batch_size: upsert_batch_size.max(1),
        }
    }

    fn metadata_from(row: VectorRow) -> Result<(String, Vec<f32>, RecordMetadata)> {
        let values = decode_values(&row.vector)?;

        let extra = match row.extra.as_deref() {
            Some(json) => serde_json::from_str(json).map_err(|error| {
                PipelineError::Store(format!("corrupt metadata for record {}: {error}", row.id))
            })?,
            None => Default::default(),
        };

        let metadata = RecordMetadata {
            text: row.text,
            source_doc_id: row.source_doc_id,
            source_doc_name: row.source_doc_name,
            chunk_index: usize::try_from(row.chunk_index).unwrap_or(0),
            extra,
        };

        Ok((row.id, values, metadata))
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn provision(&self) -> Result<()> {
        // Migrations are tracked, so re-running them is a no-op.
        self.database
            .run_migrations()
            .await
            .map_err(|error| PipelineError::Store(format!("failed to provision store: {error}")))?;

        debug!("SQLite store '{}' provisioned", self.namespace);
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        ensure_dimensions(self.dimension, records)?;

        let mut encoded = Vec::with_capacity(records.len());
        for record in records {
            let extra = if record.metadata.extra.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&record.metadata.extra).map_err(|error| {
                    PipelineError::Store(format!(
                        "failed to serialize metadata for record {}: {error}",
                        record.id
                    ))
                })?)
            };

            encoded.push(EncodedRow {
                record,
                vector: encode_values(&record.values),
                chunk_index: i64::try_from(record.metadata.chunk_index).unwrap_or(i64::MAX),
                extra,
            });
        }

        let dimension = i64::try_from(self.dimension).unwrap_or(i64::MAX);

        let mut tx = self
            .database
            .pool()
            .begin()
            .await
            .map_err(|error| PipelineError::Store(format!("failed to begin upsert: {error}")))?;

        for group in encoded.chunks(self.upsert_batch_size) {
            let mut builder = sqlx::QueryBuilder::<Sqlite>::new(
                "INSERT INTO vectors (namespace, id, vector, dimension, text, \
                 source_doc_id, source_doc_name, chunk_index, extra) ",
            );

            builder.push_values(group, |mut row, entry| {
                row.push_bind(self.namespace.as_str())
                    .push_bind(entry.record.id.as_str())
                    .push_bind(entry.vector.as_slice())
                    .push_bind(dimension)
                    .push_bind(entry.record.metadata.text.as_str())
                    .push_bind(entry.record.metadata.source_doc_id.as_str())
                    .push_bind(entry.record.metadata.source_doc_name.as_str())
                    .push_bind(entry.chunk_index)
                    .push_bind(entry.extra.as_deref());
            });

            builder.push(
                " ON CONFLICT (namespace, id) DO UPDATE SET \
                 vector = excluded.vector, dimension = excluded.dimension, \
                 text = excluded.text, source_doc_id = excluded.source_doc_id, \
                 source_doc_name = excluded.source_doc_name, \
                 chunk_index = excluded.chunk_index, extra = excluded.extra",
            );

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|error| PipelineError::Store(format!("failed to upsert vectors: {error}")))?;
        }

        tx.commit()
            .await
            .map_err(|error| PipelineError::Store(format!("failed to commit upsert: {error}")))?;

        debug!(
            "Upserted {} records into sqlite store '{}'",
            records.len(),
            self.namespace
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

        let mut sql = String::from(
            "SELECT id, vector, text, source_doc_id, source_doc_name, chunk_index, extra \
             FROM vectors WHERE namespace = ?",
        );
        if filter.is_some_and(|f| f.source_doc_id.is_some()) {
            sql.push_str(" AND source_doc_id = ?");
        }
        if filter.is_some_and(|f| f.source_doc_name.is_some()) {
            sql.push_str(" AND source_doc_name = ?");
        }
        sql.push_str(" ORDER BY rowid ASC LIMIT ?");

        let mut query = sqlx::query_as::<_, VectorRow>(&sql).bind(&self.namespace);
        if let Some(doc_id) = filter.and_then(|f| f.source_doc_id.as_ref()) {
            query = query.bind(doc_id);
        }
        if let Some(doc_name) = filter.and_then(|f| f.source_doc_name.as_ref()) {
            query = query.bind(doc_name);
        }
        query = query.bind(i64::try_from(self.scan_limit).unwrap_or(i64::MAX));

        let rows = query
            .fetch_all(self.database.pool())
            .await
            .map_err(|error| PipelineError::Store(format!("failed to scan vectors: {error}")))?;

        if rows.len() == self.scan_limit {
            warn!(
                "Scan limit of {} reached for namespace '{}'; results may be incomplete",
                self.scan_limit, self.namespace
            );
        }

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let (id, stored, metadata) = Self::metadata_from(row)?;
            results.push(QueryResult {
                id,
                score: cosine_similarity(values, &stored),
                metadata,
            });
        }

        sort_by_score(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    async fn delete_index(&self) -> Result<()> {
        let deleted = sqlx::query("DELETE FROM vectors WHERE namespace = ?")
            .bind(&self.namespace)
            .execute(self.database.pool())
            .await
            .map_err(|error| PipelineError::Store(format!("failed to delete vectors: {error}")))?;

        debug!(
            "Deleted {} records from sqlite store '{}'",
            deleted.rows_affected(),
            self.namespace
        );
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors WHERE namespace = ?")
            .bind(&self.namespace)
            .fetch_one(self.database.pool())
            .await
            .map_err(|error| PipelineError::Store(format!("failed to count vectors: {error}")))?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}
