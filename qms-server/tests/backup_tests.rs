//! Backup create/list/restore/delete over HTTP

mod helpers;

use axum::http::StatusCode;
use helpers::{error_message, TestApp};
use serde_json::json;

async fn create_backup(app: &TestApp) -> String {
    let (status, body) = app.post("/api/system/backups", "admin", json!({})).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["message"], "Backup created successfully");
    body["data"]["fileName"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_backups_are_admin_only() {
    let app = TestApp::new().await;
    for (method_path, role) in [("/api/system/backups", "manager"), ("/api/system/backups", "auditor")] {
        let (status, _) = app.get(method_path, role).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
    let (status, _) = app.post("/api/system/backups", "manager", json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_and_list_backups() {
    let app = TestApp::new().await;

    let (status, list) = app.get("/api/system/backups", "admin").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!([]));

    let first = create_backup(&app).await;
    let second = create_backup(&app).await;
    assert!(first.starts_with("qms-backup-") && first.ends_with(".db"));
    assert_ne!(first, second);
    assert!(app.backup_dir.join(&first).exists());

    let (_, list) = app.get("/api/system/backups", "admin").await;
    let names: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["fileName"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&first.as_str()) && names.contains(&second.as_str()));
    assert!(list[0]["sizeBytes"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_restore_rolls_back_later_changes() {
    let app = TestApp::new().await;
    let kept = app
        .create(
            "/api/ncrs",
            "user",
            json!({"title": "Before backup", "source": "internal", "severity": "minor"}),
        )
        .await;
    let backup = create_backup(&app).await;

    let later = app
        .create(
            "/api/ncrs",
            "user",
            json!({"title": "After backup", "source": "supplier", "severity": "major"}),
        )
        .await;
    app.delete(&format!("/api/ncrs/{}", kept), "manager").await;

    let (status, body) = app
        .post(&format!("/api/system/backups/{}/restore", backup), "admin", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["fileName"], backup.as_str());
    assert!(body["data"]["rowsRestored"].as_u64().unwrap() > 0);

    let (status, ncr) = app.get(&format!("/api/ncrs/{}", kept), "viewer").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ncr["title"], "Before backup");
    let (status, _) = app.get(&format!("/api/ncrs/{}", later), "viewer").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Numbering continues from the restored data
    let (_, created) = app
        .post(
            "/api/ncrs",
            "user",
            json!({"title": "Post restore", "source": "internal", "severity": "minor"}),
        )
        .await;
    let (_, ncr) = app
        .get(&format!("/api/ncrs/{}", created["id"]), "viewer")
        .await;
    assert_eq!(ncr["ncrNumber"], "NCR-0002");

    let (_, trail) = app
        .get("/api/audit-logs?entityType=backup&action=restore", "admin")
        .await;
    assert_eq!(trail["total"], 1);
}

#[tokio::test]
async fn test_delete_backup() {
    let app = TestApp::new().await;
    let backup = create_backup(&app).await;

    let (status, body) = app
        .delete(&format!("/api/system/backups/{}", backup), "admin")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Backup deleted successfully");
    assert!(!app.backup_dir.join(&backup).exists());

    let (status, body) = app
        .delete(&format!("/api/system/backups/{}", backup), "admin")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), format!("Backup '{}' not found", backup));
}

#[tokio::test]
async fn test_rejects_unsafe_names() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post("/api/system/backups/notes.txt/restore", "admin", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Invalid backup file name 'notes.txt'");

    let (status, _) = app.delete("/api/system/backups/..%2Fqms.db", "admin").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_restore_rejects_foreign_database() {
    let app = TestApp::new().await;
    std::fs::create_dir_all(&app.backup_dir).unwrap();

    let foreign = app.backup_dir.join("other.db");
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&foreign)
        .create_if_missing(true);
    let pool = sqlx::SqlitePool::connect_with(options).await.unwrap();
    sqlx::query("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let (status, body) = app
        .post("/api/system/backups/other.db/restore", "admin", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "File is not a QMS database backup");

    // Live data is untouched
    let (status, _) = app.get("/api/users/me", "user").await;
    assert_eq!(status, StatusCode::OK);
}
