//! Updates and deletes addressed to ids that do not exist

mod helpers;

use axum::http::StatusCode;
use helpers::{error_message, TestApp};
use serde_json::{json, Value};

const MISSING_ID: i64 = 999;

/// Collection path and not-found message of every entity with PUT/DELETE by id
const ENTITIES: &[(&str, &str)] = &[
    ("/api/improvement-ideas", "Improvement idea not found"),
    ("/api/implementation-tasks", "Implementation task not found"),
    ("/api/audits", "Audit not found"),
    ("/api/audit-findings", "Audit finding not found"),
    ("/api/ncrs", "NCR not found"),
    ("/api/capas", "CAPA not found"),
    ("/api/departments", "Department not found"),
    ("/api/processes", "Process not found"),
    ("/api/roles", "Role not found"),
    ("/api/email-templates", "Email template not found"),
    ("/api/skill-levels", "Skill level not found"),
];

async fn audit_trail_total(app: &TestApp) -> Value {
    let (status, page) = app.get("/api/audit-logs", "admin").await;
    assert_eq!(status, StatusCode::OK);
    page["total"].clone()
}

#[tokio::test]
async fn test_update_missing_record_is_not_found() {
    let app = TestApp::new().await;
    let trail_before = audit_trail_total(&app).await;

    for (collection, message) in ENTITIES {
        let path = format!("{}/{}", collection, MISSING_ID);
        let (status, body) = app.put(&path, "admin", json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "PUT {}: {}", path, body);
        assert_eq!(error_message(&body), *message, "PUT {}", path);
    }

    assert_eq!(audit_trail_total(&app).await, trail_before);
}

#[tokio::test]
async fn test_delete_missing_record_is_not_found() {
    let app = TestApp::new().await;
    let trail_before = audit_trail_total(&app).await;

    for (collection, message) in ENTITIES {
        let path = format!("{}/{}", collection, MISSING_ID);
        let (status, body) = app.delete(&path, "admin").await;
        assert_eq!(status, StatusCode::NOT_FOUND, "DELETE {}: {}", path, body);
        assert_eq!(error_message(&body), *message, "DELETE {}", path);
    }

    assert_eq!(audit_trail_total(&app).await, trail_before);
}

#[tokio::test]
async fn test_missing_record_leaves_existing_rows_alone() {
    let app = TestApp::new().await;
    let id = app
        .create(
            "/api/ncrs",
            "user",
            json!({"title": "Burr on flange", "source": "internal", "severity": "minor"}),
        )
        .await;
    let (_, before) = app.get(&format!("/api/ncrs/{}", id), "viewer").await;

    let (status, _) = app
        .put(&format!("/api/ncrs/{}", id + 1), "manager", json!({"title": "Other"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.delete(&format!("/api/ncrs/{}", id + 1), "manager").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, after) = app.get(&format!("/api/ncrs/{}", id), "viewer").await;
    assert_eq!(after, before);
    let (_, page) = app.get("/api/ncrs", "viewer").await;
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn test_role_assignment_for_missing_user() {
    let app = TestApp::new().await;
    let (status, body) = app
        .put(
            &format!("/api/users/{}/roles", MISSING_ID),
            "admin",
            json!({"roles": ["viewer"]}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "User not found");
}
