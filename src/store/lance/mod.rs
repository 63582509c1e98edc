// LanceDB vector store
// Delegates nearest-neighbor search to an embedded LanceDB table, one
// table per namespace. Cosine distance is requested explicitly so scores
// match the in-process backends, and ties are re-sorted by a stored
// insertion sequence because the index returns equal distances in
// arbitrary order.

#[cfg(test)]
mod tests;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    QueryFilter, QueryResult, RecordMetadata, VectorRecord, VectorStore, ensure_dimensions,
};
use crate::{PipelineError, Result};

pub struct LanceStore {
    connection: Connection,
    namespace: String,
    table_name: String,
    dimension: usize,
    upsert_batch_size: usize,
}

// Manual impl because `lancedb::Connection` does not implement `Debug`.
impl std::fmt::Debug for LanceStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanceStore")
            .field("namespace", &self.namespace)
            .field("table_name", &self.table_name)
            .field("dimension", &self.dimension)
            .field("upsert_batch_size", &self.upsert_batch_size)
            .finish_non_exhaustive()
    }
}

fn table_name_for(namespace: &str) -> String {
    let sanitized: String = namespace
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("vectors_{sanitized}")
}

/// Escape a value for use inside a single-quoted SQL literal.
fn sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn predicate_for(filter: &QueryFilter) -> String {
    let mut clauses = Vec::new();
    if let Some(doc_id) = &filter.source_doc_id {
        clauses.push(format!("source_doc_id = '{}'", sql_literal(doc_id)));
    }
    if let Some(doc_name) = &filter.source_doc_name {
        clauses.push(format!("source_doc_name = '{}'", sql_literal(doc_name)));
    }
    clauses.join(" AND ")
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::Store(format!("missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| PipelineError::Store(format!("invalid {name} column type")))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::Store(format!("missing {name} column")))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| PipelineError::Store(format!("invalid {name} column type")))
}

fn i64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::Store(format!("missing {name} column")))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| PipelineError::Store(format!("invalid {name} column type")))
}

impl LanceStore {
    /// Connect to (creating if needed) the vector database at `path`.
    #[inline]
    pub async fn connect(
        path: &Path,
        namespace: impl Into<String>,
        dimension: usize,
        upsert_batch_size: usize,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                PipelineError::Store(format!(
                    "failed to create vector database directory: {error}"
                ))
            })?;
        }

        let uri = format!("file://{}", path.display());
        debug!("Connecting to vector database at {}", uri);

        let connection = lancedb::connect(&uri).execute().await.map_err(|error| {
            PipelineError::Store(format!("failed to connect to vector database: {error}"))
        })?;

        let namespace = namespace.into();
        let table_name = table_name_for(&namespace);

        Ok(Self {
            connection,
            namespace,
            table_name,
            dimension,
            upsert_batch_size: upsert_batch_size.max(1),
        })
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    i32::try_from(self.dimension).unwrap_or(i32::MAX),
                ),
                false,
            ),
            Field::new("text", DataType::Utf8, false),
            Field::new("source_doc_id", DataType::Utf8, false),
            Field::new("source_doc_name", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("extra", DataType::Utf8, true),
            Field::new("seq", DataType::Int64, false),
        ]))
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|error| PipelineError::Store(format!("failed to list tables: {error}")))?;
        Ok(names.contains(&self.table_name))
    }

    async fn ensure_table(&self) -> Result<()> {
        if self.table_exists().await? {
            return Ok(());
        }

        self.connection
            .create_empty_table(&self.table_name, self.schema())
            .execute()
            .await
            .map_err(|error| {
                PipelineError::Store(format!("failed to create vector table: {error}"))
            })?;

        info!(
            "Created vector table '{}' with {} dimensions",
            self.table_name, self.dimension
        );
        Ok(())
    }

    async fn open_table(&self) -> Result<lancedb::Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|error| PipelineError::Store(format!("failed to open table: {error}")))
    }

    fn record_batch(&self, records: &[VectorRecord], start_seq: i64) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut texts = Vec::with_capacity(len);
        let mut doc_ids = Vec::with_capacity(len);
        let mut doc_names = Vec::with_capacity(len);
        let mut chunk_indexes = Vec::with_capacity(len);
        let mut extras = Vec::with_capacity(len);
        let mut seqs = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.dimension);

        for (row, record) in records.iter().enumerate() {
            ids.push(record.id.as_str());
            texts.push(record.metadata.text.as_str());
            doc_ids.push(record.metadata.source_doc_id.as_str());
            doc_names.push(record.metadata.source_doc_name.as_str());
            chunk_indexes.push(u32::try_from(record.metadata.chunk_index).unwrap_or(u32::MAX));
            extras.push(if record.metadata.extra.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&record.metadata.extra).map_err(|error| {
                    PipelineError::Store(format!(
                        "failed to serialize metadata for record {}: {error}",
                        record.id
                    ))
                })?)
            });
            seqs.push(start_seq.saturating_add(i64::try_from(row).unwrap_or(i64::MAX)));
            flat_values.extend_from_slice(&record.values);
        }

        let item_field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            item_field,
            i32::try_from(self.dimension).unwrap_or(i32::MAX),
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|error| PipelineError::Store(format!("failed to create vector array: {error}")))?;

        let extras: Vec<Option<&str>> = extras.iter().map(Option::as_deref).collect();

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(doc_ids)),
            Arc::new(StringArray::from(doc_names)),
            Arc::new(UInt32Array::from(chunk_indexes)),
            Arc::new(StringArray::from(extras)),
            Arc::new(Int64Array::from(seqs)),
        ];

        RecordBatch::try_new(self.schema(), arrays)
            .map_err(|error| PipelineError::Store(format!("failed to create record batch: {error}")))
    }

    fn parse_batch(&self, batch: &RecordBatch, out: &mut Vec<(i64, QueryResult)>) -> Result<()> {
        let ids = string_column(batch, "id")?;
        let texts = string_column(batch, "text")?;
        let doc_ids = string_column(batch, "source_doc_id")?;
        let doc_names = string_column(batch, "source_doc_name")?;
        let chunk_indexes = u32_column(batch, "chunk_index")?;
        let extras = string_column(batch, "extra")?;
        let seqs = i64_column(batch, "seq")?;

        let distances = batch
            .column_by_name("_distance")
            .map(|column| column.as_any().downcast_ref::<Float32Array>());

        for row in 0..batch.num_rows() {
            let extra = if extras.is_null(row) {
                Default::default()
            } else {
                serde_json::from_str(extras.value(row)).map_err(|error| {
                    PipelineError::Store(format!(
                        "corrupt metadata for record {}: {error}",
                        ids.value(row)
                    ))
                })?
            };

            let distance = distances
                .flatten()
                .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            // Cosine distance is 1 - similarity.
            let score = 1.0 - distance;

            out.push((
                seqs.value(row),
                QueryResult {
                    id: ids.value(row).to_string(),
                    score,
                    metadata: RecordMetadata {
                        text: texts.value(row).to_string(),
                        source_doc_id: doc_ids.value(row).to_string(),
                        source_doc_name: doc_names.value(row).to_string(),
                        chunk_index: usize::try_from(chunk_indexes.value(row)).unwrap_or(0),
                        extra,
                    },
                },
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    fn name(&self) -> &'static str {
        "lance"
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn provision(&self) -> Result<()> {
        self.ensure_table().await
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        ensure_dimensions(self.dimension, records)?;
        self.ensure_table().await?;

        let table = self.open_table().await?;
        let start_seq = chrono::Utc::now().timestamp_micros();

        for (group_index, group) in records.chunks(self.upsert_batch_size).enumerate() {
            // Replace any rows that share an id with this group.
            let ids = group
                .iter()
                .map(|record| format!("'{}'", sql_literal(&record.id)))
                .collect::<Vec<_>>()
                .join(", ");
            table
                .delete(&format!("id IN ({ids})"))
                .await
                .map_err(|error| {
                    PipelineError::Store(format!("failed to replace vectors: {error}"))
                })?;

            let offset = i64::try_from(group_index * self.upsert_batch_size).unwrap_or(i64::MAX);
            let batch = self.record_batch(group, start_seq.saturating_add(offset))?;
            let schema = batch.schema();
            let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

            table.add(reader).execute().await.map_err(|error| {
                PipelineError::Store(format!("failed to insert vectors: {error}"))
            })?;
        }

        debug!(
            "Upserted {} records into lance table '{}'",
            records.len(),
            self.table_name
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

        if !self.table_exists().await? {
            return Ok(Vec::new());
        }

        let table = self.open_table().await?;

        let mut query = table
            .vector_search(values)
            .map_err(|error| {
                PipelineError::Store(format!("failed to create vector search: {error}"))
            })?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(top_k);

        if let Some(filter) = filter {
            if !filter.is_empty() {
                query = query.only_if(predicate_for(filter));
            }
        }

        let mut stream = query
            .execute()
            .await
            .map_err(|error| PipelineError::Store(format!("failed to execute search: {error}")))?;

        let mut scored: Vec<(i64, QueryResult)> = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(|error| {
            PipelineError::Store(format!("failed to read result stream: {error}"))
        })? {
            self.parse_batch(&batch, &mut scored)?;
        }

        // The index returns rows ordered by distance but makes no promise
        // about equal distances, so re-sort with the insertion sequence as
        // the tiebreaker.
        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        Ok(scored
            .into_iter()
            .map(|(_, result)| result)
            .take(top_k)
            .collect())
    }

    async fn delete_index(&self) -> Result<()> {
        if !self.table_exists().await? {
            return Ok(());
        }

        self.connection
            .drop_table(&self.table_name)
            .await
            .map_err(|error| PipelineError::Store(format!("failed to drop table: {error}")))?;

        info!("Dropped vector table '{}'", self.table_name);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await? {
            return Ok(0);
        }

        let table = self.open_table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|error| PipelineError::Store(format!("failed to count rows: {error}")))
    }
}
