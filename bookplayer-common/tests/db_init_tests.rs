//! Progress database initialization

use bookplayer_common::db::init_database;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("state.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());

    // Parent folder and file were created
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("state.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO progress (book_id, track, position_secs, updated_at) VALUES ('7', 2, 31.5, '2026-01-01T00:00:00Z')",
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    // Second open keeps existing rows
    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM progress")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_progress_table_has_expected_columns() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("state.db")).await.unwrap();

    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('progress')")
        .fetch_all(&pool)
        .await
        .unwrap();

    for expected in ["book_id", "track", "position_secs", "updated_at"] {
        assert!(columns.iter().any(|c| c == expected), "missing column {}", expected);
    }
}
