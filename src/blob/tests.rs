use tempfile::TempDir;

use super::*;

#[tokio::test]
async fn fs_store_reads_files_under_its_root() {
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join("policy.txt"), b"leave policy").expect("write file");

    let store = FsBlobStore::new(dir.path());
    let bytes = store.get("policy.txt").await.expect("blob read succeeds");
    assert_eq!(bytes, b"leave policy");
}

#[tokio::test]
async fn fs_store_resolves_nested_keys() {
    let dir = TempDir::new().expect("temp dir");
    std::fs::create_dir_all(dir.path().join("docs/2024")).expect("create subdirs");
    std::fs::write(dir.path().join("docs/2024/notes.md"), b"# notes").expect("write file");

    let store = FsBlobStore::new(dir.path());
    let bytes = store.get("docs/2024/notes.md").await.expect("blob read succeeds");
    assert_eq!(bytes, b"# notes");
}

#[tokio::test]
async fn missing_blob_is_a_typed_error() {
    let dir = TempDir::new().expect("temp dir");
    let store = FsBlobStore::new(dir.path());

    let error = store.get("absent.txt").await.expect_err("missing blob fails");
    assert!(matches!(error, PipelineError::Blob(_)));
    assert!(error.to_string().contains("absent.txt"));
}

#[tokio::test]
async fn traversal_keys_are_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let store = FsBlobStore::new(dir.path());

    for key in ["../secret", "a/../../b", "/etc/passwd", ""] {
        let error = store
            .get(key)
            .await
            .expect_err("escaping key should be rejected");
        assert!(matches!(error, PipelineError::Blob(_)), "key {key:?}");
    }
}

#[tokio::test]
async fn memory_store_round_trips() {
    let store = MemoryBlobStore::new();
    store.insert("doc-1", b"contents".as_slice()).await;

    let bytes = store.get("doc-1").await.expect("blob read succeeds");
    assert_eq!(bytes, b"contents");

    let error = store.get("doc-2").await.expect_err("missing blob fails");
    assert!(error.to_string().contains("doc-2"));
}
