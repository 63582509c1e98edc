#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

/// Integration tests exercising the vector store contract against every
/// real backend
use std::collections::BTreeMap;

use tempfile::TempDir;

use ragpipe::PipelineError;
use ragpipe::config::{Config, EmbeddingConfig, StoreBackend, StoreConfig};
use ragpipe::database::Database;
use ragpipe::store::{
    LanceStore, MemoryStore, QueryFilter, RecordMetadata, SqliteStore, VectorRecord, VectorStore,
    open_store,
};

const DIMENSION: usize = 8;

fn vector_of(variation: f32) -> Vec<f32> {
    (0..DIMENSION)
        .map(|component| (component as f32).mul_add(0.01, variation).sin() * 0.1)
        .collect()
}

fn record(id: &str, doc_id: &str, doc_name: &str, index: usize, variation: f32) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        values: vector_of(variation),
        metadata: RecordMetadata {
            text: format!("chunk {} of {}", index, doc_name),
            source_doc_id: doc_id.to_string(),
            source_doc_name: doc_name.to_string(),
            chunk_index: index,
            extra: BTreeMap::new(),
        },
    }
}

fn dataset() -> Vec<VectorRecord> {
    vec![
        record("r1", "doc-a", "alpha.md", 0, 0.10),
        record("r2", "doc-a", "alpha.md", 1, 0.35),
        record("r3", "doc-a", "alpha.md", 2, 0.60),
        record("r4", "doc-b", "beta.md", 0, 0.85),
        record("r5", "doc-b", "beta.md", 1, 1.10),
        record("r6", "doc-c", "gamma.md", 0, 1.35),
    ]
}

async fn exercise_store_contract(store: &dyn VectorStore) {
    store.provision().await.expect("provision should succeed");
    store.provision().await.expect("provision is idempotent");

    let records = dataset();
    store.upsert(&records).await.expect("upsert should succeed");
    assert_eq!(
        store.count().await.expect("count should succeed"),
        records.len()
    );

    let results = store
        .query(&records[0].values, 3, None)
        .await
        .expect("query should succeed");
    assert_eq!(results.len(), 3, "query should respect top_k");
    assert_eq!(
        results[0].id, "r1",
        "a stored vector is its own nearest neighbor"
    );
    for pair in results.windows(2) {
        assert!(
            pair[0].score >= pair[1].score,
            "scores must descend: {} then {}",
            pair[0].score,
            pair[1].score
        );
    }

    let filtered = store
        .query(&records[0].values, 10, Some(&QueryFilter::by_doc_id("doc-b")))
        .await
        .expect("filtered query should succeed");
    assert_eq!(filtered.len(), 2);
    assert!(
        filtered
            .iter()
            .all(|result| result.metadata.source_doc_id == "doc-b")
    );

    let named = store
        .query(
            &records[0].values,
            10,
            Some(&QueryFilter::by_doc_name("gamma.md")),
        )
        .await
        .expect("filtered query should succeed");
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].id, "r6");

    // Writing the same id replaces the record, never duplicates it.
    let mut replacement = records[0].clone();
    replacement.metadata.text = "replacement text".to_string();
    store
        .upsert(std::slice::from_ref(&replacement))
        .await
        .expect("replacing upsert should succeed");
    assert_eq!(
        store.count().await.expect("count should succeed"),
        records.len()
    );

    let nearest = store
        .query(&records[0].values, 1, None)
        .await
        .expect("query should succeed");
    assert_eq!(nearest[0].metadata.text, "replacement text");

    // A wrong-dimension record fails the whole write.
    let bad = VectorRecord {
        id: "bad".to_string(),
        values: vec![0.5; DIMENSION + 1],
        metadata: RecordMetadata::default(),
    };
    let error = store
        .upsert(&[bad])
        .await
        .expect_err("dimension mismatch should fail");
    assert!(matches!(
        error,
        PipelineError::DimensionMismatch {
            expected: DIMENSION,
            actual: 9
        }
    ));
    assert_eq!(
        store.count().await.expect("count should succeed"),
        records.len()
    );

    store.delete_index().await.expect("delete_index should succeed");
    assert_eq!(store.count().await.expect("count should succeed"), 0);
    store.delete_index().await.expect("delete_index is idempotent");
}

#[tokio::test]
async fn memory_store_satisfies_the_contract() {
    let store = MemoryStore::new("contract", DIMENSION);
    exercise_store_contract(&store).await;
}

#[tokio::test]
async fn sqlite_store_satisfies_the_contract() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::open_in_dir(temp_dir.path())
        .await
        .expect("database should open");
    let store = SqliteStore::new(database, "contract", DIMENSION, 1000, 64);
    exercise_store_contract(&store).await;
}

#[tokio::test]
async fn lance_store_satisfies_the_contract() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = LanceStore::connect(&temp_dir.path().join("vectors"), "contract", DIMENSION, 64)
        .await
        .expect("lance store should connect");
    exercise_store_contract(&store).await;
}

async fn exercise_tie_order(store: &dyn VectorStore) {
    store.provision().await.expect("provision should succeed");

    let shared = vector_of(0.5);
    let tied: Vec<VectorRecord> = ["t1", "t2", "t3"]
        .iter()
        .enumerate()
        .map(|(index, id)| {
            let mut tied_record = record(id, "doc-t", "tied.md", index, 0.0);
            tied_record.values = shared.clone();
            tied_record
        })
        .collect();

    store.upsert(&tied).await.expect("upsert should succeed");

    let results = store
        .query(&shared, 3, None)
        .await
        .expect("query should succeed");
    let ids: Vec<&str> = results.iter().map(|result| result.id.as_str()).collect();
    assert_eq!(
        ids,
        ["t1", "t2", "t3"],
        "equal scores resolve by insertion order"
    );
}

#[tokio::test]
async fn equal_scores_resolve_by_insertion_order_on_every_backend() {
    let memory = MemoryStore::new("ties", DIMENSION);
    exercise_tie_order(&memory).await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let database = Database::open_in_dir(temp_dir.path())
        .await
        .expect("database should open");
    let sqlite = SqliteStore::new(database, "ties", DIMENSION, 1000, 64);
    exercise_tie_order(&sqlite).await;

    let lance_dir = TempDir::new().expect("should create temp dir");
    let lance = LanceStore::connect(&lance_dir.path().join("vectors"), "ties", DIMENSION, 64)
        .await
        .expect("lance store should connect");
    exercise_tie_order(&lance).await;
}

#[tokio::test]
async fn lance_namespaces_are_isolated() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("vectors");

    let alpha = LanceStore::connect(&path, "alpha", DIMENSION, 64)
        .await
        .expect("lance store should connect");
    let beta = LanceStore::connect(&path, "beta", DIMENSION, 64)
        .await
        .expect("lance store should connect");

    alpha.provision().await.expect("provision should succeed");
    beta.provision().await.expect("provision should succeed");

    alpha
        .upsert(&dataset()[..2])
        .await
        .expect("upsert should succeed");
    beta.upsert(&dataset()[..1])
        .await
        .expect("upsert should succeed");

    assert_eq!(alpha.count().await.expect("count should succeed"), 2);
    assert_eq!(beta.count().await.expect("count should succeed"), 1);

    alpha
        .delete_index()
        .await
        .expect("delete_index should succeed");
    assert_eq!(alpha.count().await.expect("count should succeed"), 0);
    assert_eq!(
        beta.count().await.expect("count should succeed"),
        1,
        "deleting one namespace must not touch another"
    );
}

#[tokio::test]
async fn lance_data_survives_reconnect() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("vectors");

    {
        let store = LanceStore::connect(&path, "persist", DIMENSION, 64)
            .await
            .expect("lance store should connect");
        store.provision().await.expect("provision should succeed");
        store
            .upsert(&dataset())
            .await
            .expect("upsert should succeed");
    }

    let reopened = LanceStore::connect(&path, "persist", DIMENSION, 64)
        .await
        .expect("lance store should reconnect");
    assert_eq!(reopened.count().await.expect("count should succeed"), 6);

    let results = reopened
        .query(&vector_of(0.10), 1, None)
        .await
        .expect("query should succeed");
    assert_eq!(results[0].id, "r1");
}

#[tokio::test]
async fn open_store_builds_every_configured_backend() {
    for backend in [StoreBackend::Memory, StoreBackend::Sqlite, StoreBackend::Lance] {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let config = Config {
            embedding: EmbeddingConfig {
                dimension: DIMENSION,
                ..EmbeddingConfig::default()
            },
            store: StoreConfig {
                backend,
                ..StoreConfig::default()
            },
            base_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let store = open_store(&config, "factory").await.expect("store should open");
        assert_eq!(store.dimension(), DIMENSION);
        assert_eq!(store.namespace(), "factory");

        store.provision().await.expect("provision should succeed");
        store.upsert(&dataset()).await.expect("upsert should succeed");
        assert_eq!(
            store.count().await.expect("count should succeed"),
            6,
            "{} backend",
            store.name()
        );
    }
}
