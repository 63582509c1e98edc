use tempfile::TempDir;

use super::*;

#[tokio::test]
async fn creates_database_and_runs_migrations() {
    let dir = TempDir::new().expect("temp dir");
    let database = Database::open_in_dir(dir.path())
        .await
        .expect("database opens");

    let runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pipeline_runs")
        .fetch_one(database.pool())
        .await
        .expect("pipeline_runs table exists");
    assert_eq!(runs, 0);

    let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
        .fetch_one(database.pool())
        .await
        .expect("vectors table exists");
    assert_eq!(vectors, 0);
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let dir = TempDir::new().expect("temp dir");
    let database = Database::open_in_dir(dir.path())
        .await
        .expect("database opens");

    database
        .run_migrations()
        .await
        .expect("re-running migrations is a no-op");
}

#[tokio::test]
async fn optimize_succeeds_on_fresh_database() {
    let dir = TempDir::new().expect("temp dir");
    let database = Database::open_in_dir(dir.path())
        .await
        .expect("database opens");

    database.optimize().await.expect("optimize runs");
}
