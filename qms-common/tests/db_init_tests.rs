//! Integration tests for database initialization
//!
//! Covers:
//! - Automatic database creation with the full schema
//! - Idempotent re-open of an existing database
//! - Default role seeding
//! - Migration version tracking
//! - Record number sequencing

use qms_common::db::init::{init_database, QMS_TABLES};
use qms_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};
use qms_common::db::sequence::next_number;
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("qms.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("qms.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("qms.db")).await.unwrap();

    for table in QMS_TABLES {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists, "Missing table: {}", table);
    }
}

#[tokio::test]
async fn test_default_roles_seeded_once() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("qms.db");

    let pool = init_database(&db_path).await.unwrap();
    pool.close().await;
    let pool = init_database(&db_path).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roles")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 6);

    let superuser_level: i64 =
        sqlx::query_scalar("SELECT level FROM roles WHERE name = 'superuser'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(superuser_level, 100);
}

#[tokio::test]
async fn test_migrations_recorded() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("qms.db")).await.unwrap();

    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

    let has_process_id: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('ncrs') WHERE name = 'process_id'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(has_process_id, 1);
}

#[tokio::test]
async fn test_foreign_keys_enforced() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("qms.db")).await.unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO implementation_tasks
            (improvement_idea_id, task_name, status, progress_percentage, created_by, created_at, updated_at)
        VALUES (999, 'orphan', 'pending', 0, 1, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')
        "#,
    )
    .execute(&pool)
    .await;

    assert!(result.is_err(), "Orphan task insert should violate foreign key");
}

#[tokio::test]
async fn test_next_number_sequence() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("qms.db")).await.unwrap();
    let mut conn = pool.acquire().await.unwrap();

    let first = next_number(&mut conn, "ncrs", "ncr_number", "NCR").await.unwrap();
    assert_eq!(first, "NCR-0001");

    sqlx::query(
        r#"
        INSERT INTO users (username, full_name, active, created_at, updated_at)
        VALUES ('seq', 'Sequence Tester', 1, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')
        "#,
    )
    .execute(&mut *conn)
    .await
    .unwrap();

    sqlx::query(
        r#"
        INSERT INTO ncrs (ncr_number, title, source, severity, status, detected_date,
                          created_by, created_at, updated_at)
        VALUES ('NCR-0009', 't', 'internal', 'minor', 'open', '2024-01-01', 1,
                '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')
        "#,
    )
    .execute(&mut *conn)
    .await
    .unwrap();

    let next = next_number(&mut conn, "ncrs", "ncr_number", "NCR").await.unwrap();
    assert_eq!(next, "NCR-0010");
}
