use super::*;
use crate::PipelineError;
use crate::store::RecordMetadata;

fn record(id: &str, values: Vec<f32>, doc_id: &str, chunk_index: usize) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        values,
        metadata: RecordMetadata {
            text: format!("text for {id}"),
            source_doc_id: doc_id.to_string(),
            source_doc_name: format!("{doc_id}.txt"),
            chunk_index,
            extra: Default::default(),
        },
    }
}

#[tokio::test]
async fn round_trip_returns_same_id_with_unit_score() {
    let store = MemoryStore::new("runs/1", 3);
    store.provision().await.expect("provision succeeds");

    let vector = vec![0.6, 0.8, 0.0];
    store
        .upsert(&[record("a", vector.clone(), "doc", 0)])
        .await
        .expect("upsert succeeds");

    let results = store.query(&vector, 1, None).await.expect("query succeeds");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "a");
    assert!((results[0].score - 1.0).abs() < 1e-5);
    assert_eq!(results[0].metadata.text, "text for a");
}

#[tokio::test]
async fn results_descend_with_ties_in_insertion_order() {
    let store = MemoryStore::new("ns", 2);

    // b and c have identical vectors, so their scores tie exactly.
    store
        .upsert(&[
            record("a", vec![0.0, 1.0], "doc", 0),
            record("b", vec![1.0, 0.0], "doc", 1),
            record("c", vec![1.0, 0.0], "doc", 2),
        ])
        .await
        .expect("upsert succeeds");

    let results = store
        .query(&[1.0, 0.0], 10, None)
        .await
        .expect("query succeeds");

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c", "a"]);
    assert!(results[0].score >= results[1].score);
    assert!(results[1].score >= results[2].score);
}

#[tokio::test]
async fn top_k_bounds_result_count() {
    let store = MemoryStore::new("ns", 2);
    let records: Vec<VectorRecord> = (0..8)
        .map(|index| record(&format!("r{index}"), vec![1.0, 0.0], "doc", index))
        .collect();
    store.upsert(&records).await.expect("upsert succeeds");

    let results = store
        .query(&[1.0, 0.0], 3, None)
        .await
        .expect("query succeeds");
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn filter_restricts_candidates_before_scoring() {
    let store = MemoryStore::new("ns", 2);
    store
        .upsert(&[
            record("a", vec![1.0, 0.0], "doc-1", 0),
            record("b", vec![1.0, 0.0], "doc-2", 0),
        ])
        .await
        .expect("upsert succeeds");

    let filter = QueryFilter::by_doc_id("doc-2");
    let results = store
        .query(&[1.0, 0.0], 10, Some(&filter))
        .await
        .expect("query succeeds");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "b");
}

#[tokio::test]
async fn upsert_replaces_matching_id_in_place() {
    let store = MemoryStore::new("ns", 2);
    store
        .upsert(&[
            record("a", vec![1.0, 0.0], "doc", 0),
            record("b", vec![1.0, 0.0], "doc", 1),
        ])
        .await
        .expect("first upsert succeeds");

    let mut replacement = record("a", vec![1.0, 0.0], "doc", 0);
    replacement.metadata.text = "updated text".to_string();
    store
        .upsert(&[replacement])
        .await
        .expect("second upsert succeeds");

    assert_eq!(store.count().await.expect("count succeeds"), 2);

    // The replacement keeps its original rank among tied scores.
    let results = store
        .query(&[1.0, 0.0], 10, None)
        .await
        .expect("query succeeds");
    assert_eq!(results[0].id, "a");
    assert_eq!(results[0].metadata.text, "updated text");
    assert_eq!(results[1].id, "b");
}

#[tokio::test]
async fn dimension_mismatch_fails_without_partial_write() {
    let store = MemoryStore::new("ns", 3);

    let error = store
        .upsert(&[
            record("good", vec![1.0, 0.0, 0.0], "doc", 0),
            record("bad", vec![1.0, 0.0], "doc", 1),
        ])
        .await
        .expect_err("mismatched record should fail the whole call");

    assert!(matches!(
        error,
        PipelineError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    ));
    assert_eq!(store.count().await.expect("count succeeds"), 0);
}

#[tokio::test]
async fn query_vector_dimension_is_checked() {
    let store = MemoryStore::new("ns", 3);
    let error = store
        .query(&[1.0, 0.0], 1, None)
        .await
        .expect_err("wrong query dimension should fail");
    assert!(matches!(error, PipelineError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn provision_and_delete_index_are_idempotent() {
    let store = MemoryStore::new("ns", 2);
    store.provision().await.expect("first provision");
    store.provision().await.expect("second provision");

    store
        .upsert(&[record("a", vec![1.0, 0.0], "doc", 0)])
        .await
        .expect("upsert succeeds");
    assert_eq!(store.count().await.expect("count succeeds"), 1);

    store.delete_index().await.expect("first delete");
    assert_eq!(store.count().await.expect("count succeeds"), 0);
    store.delete_index().await.expect("second delete is a no-op");
}

#[tokio::test]
async fn zero_norm_query_scores_zero() {
    let store = MemoryStore::new("ns", 2);
    store
        .upsert(&[record("a", vec![1.0, 0.0], "doc", 0)])
        .await
        .expect("upsert succeeds");

    let results = store
        .query(&[0.0, 0.0], 1, None)
        .await
        .expect("query succeeds");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].score, 0.0);
}
