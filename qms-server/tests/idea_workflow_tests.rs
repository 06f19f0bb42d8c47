//! Improvement ideas and their implementation tasks over HTTP

mod helpers;

use axum::http::StatusCode;
use helpers::{error_message, TestApp};
use qms_common::status::IdeaStatus;
use qms_server::api::guarded_update;
use qms_server::db::ideas;
use qms_server::ApiError;
use serde_json::{json, Value};

async fn submit_idea(app: &TestApp, title: &str) -> i64 {
    app.create(
        "/api/improvement-ideas",
        "user",
        json!({
            "title": title,
            "description": "Reduce changeover time on line 2",
            "category": "process",
            "estimatedCost": 1200.0
        }),
    )
    .await
}

#[tokio::test]
async fn test_idea_gets_sequential_number() {
    let app = TestApp::new().await;
    let first = submit_idea(&app, "Shadow boards").await;
    let second = submit_idea(&app, "Kanban cards").await;

    let (status, idea) = app.get(&format!("/api/improvement-ideas/{}", first), "viewer").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(idea["ideaNumber"], "IDEA-0001");
    assert_eq!(idea["status"], "submitted");
    assert_eq!(idea["submittedBy"], app.user("user").id);

    let (_, idea) = app.get(&format!("/api/improvement-ideas/{}", second), "viewer").await;
    assert_eq!(idea["ideaNumber"], "IDEA-0002");
}

#[tokio::test]
async fn test_idea_requires_title() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post("/api/improvement-ideas", "user", json!({"title": "   "}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Title is required");
}

#[tokio::test]
async fn test_viewer_cannot_submit_idea() {
    let app = TestApp::new().await;
    let (status, _) = app
        .post("/api/improvement-ideas", "viewer", json!({"title": "Nope"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_approve_requires_manager() {
    let app = TestApp::new().await;
    let id = submit_idea(&app, "Better labels").await;

    let (status, body) = app
        .post(&format!("/api/improvement-ideas/{}/approve", id), "user", json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        error_message(&body),
        "Insufficient permissions to review improvement ideas"
    );
}

#[tokio::test]
async fn test_approve_records_reviewer() {
    let app = TestApp::new().await;
    let id = submit_idea(&app, "Better labels").await;
    let responsible = app.user("user").id;

    let (status, body) = app
        .post(
            &format!("/api/improvement-ideas/{}/approve", id),
            "manager",
            json!({
                "reviewComments": "Go ahead",
                "responsibleUser": responsible
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Improvement idea approved successfully");
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["data"]["reviewedBy"], app.user("manager").id);
    assert_eq!(body["data"]["reviewComments"], "Go ahead");
    assert_eq!(body["data"]["responsibleUser"], responsible);
    assert!(body["data"]["reviewedDate"].is_string());

    let (status, idea) = app.get(&format!("/api/improvement-ideas/{}", id), "viewer").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(idea["status"], "approved");
    assert_eq!(idea["reviewedBy"], app.user("manager").id);

    // Approving twice is an illegal transition
    let (status, body) = app
        .post(&format!("/api/improvement-ideas/{}/approve", id), "manager", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Cannot approve idea with status 'approved'");

    let (_, unchanged) = app.get(&format!("/api/improvement-ideas/{}", id), "viewer").await;
    assert_eq!(unchanged, idea);
}

async fn fetch_idea(app: &TestApp, id: i64) -> Value {
    let (status, idea) = app.get(&format!("/api/improvement-ideas/{}", id), "viewer").await;
    assert_eq!(status, StatusCode::OK);
    idea
}

/// Approve and reject from `status` must fail and leave the idea untouched
async fn assert_review_refused(app: &TestApp, id: i64, status: &str) {
    let before = fetch_idea(app, id).await;
    assert_eq!(before["status"], status);

    for action in ["approve", "reject"] {
        let (code, body) = app
            .post(
                &format!("/api/improvement-ideas/{}/{}", id, action),
                "manager",
                json!({"reviewComments": "second look"}),
            )
            .await;
        assert_eq!(code, StatusCode::BAD_REQUEST, "{} from {}", action, status);
        assert_eq!(
            error_message(&body),
            format!("Cannot {} idea with status '{}'", action, status)
        );
    }

    let after = fetch_idea(app, id).await;
    assert_eq!(after["status"], before["status"]);
    assert_eq!(after["reviewedBy"], before["reviewedBy"]);
    assert_eq!(after["reviewComments"], before["reviewComments"]);
    assert_eq!(after["updatedAt"], before["updatedAt"]);
}

#[tokio::test]
async fn test_review_refused_outside_open_statuses() {
    let app = TestApp::new().await;

    let rejected = submit_idea(&app, "Rejected one").await;
    app.post(
        &format!("/api/improvement-ideas/{}/reject", rejected),
        "manager",
        json!({"reviewComments": "No"}),
    )
    .await;
    assert_review_refused(&app, rejected, "rejected").await;

    let id = submit_idea(&app, "Travels the whole way").await;
    let status_path = format!("/api/improvement-ideas/{}/status", id);
    app.post(&format!("/api/improvement-ideas/{}/approve", id), "manager", json!({}))
        .await;
    for (action, reached) in [
        ("start", "in_progress"),
        ("implement", "implemented"),
        ("close", "closed"),
    ] {
        let (code, body) = app.post(&status_path, "user", json!({"action": action})).await;
        assert_eq!(code, StatusCode::OK, "{}", body);
        assert_review_refused(&app, id, reached).await;
    }
}

#[tokio::test]
async fn test_interleaved_transition_is_a_conflict() {
    let app = TestApp::new().await;
    let id = submit_idea(&app, "Torque wrench calibration").await;

    // Both transactions read the idea while it is still submitted
    let mut first = app.pool.begin().await.unwrap();
    let mut second = app.pool.begin().await.unwrap();
    let seen_by_first = ideas::find_by_id(&mut *first, id).await.unwrap().unwrap();
    let seen_by_second = ideas::find_by_id(&mut *second, id).await.unwrap().unwrap();

    let mut approved = seen_by_first.clone();
    approved.status = IdeaStatus::Approved;
    guarded_update(
        ideas::update(&mut *first, &approved, Some(seen_by_first.status)).await,
        "Improvement idea",
    )
    .unwrap();
    first.commit().await.unwrap();

    let mut rejected = seen_by_second.clone();
    rejected.status = IdeaStatus::Rejected;
    let err = guarded_update(
        ideas::update(&mut *second, &rejected, Some(seen_by_second.status)).await,
        "Improvement idea",
    )
    .unwrap_err();
    drop(second);

    match err {
        ApiError::Conflict(message) => {
            assert_eq!(message, "Improvement idea was modified concurrently")
        }
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(fetch_idea(&app, id).await["status"], "approved");
}

#[tokio::test]
async fn test_reject_requires_comments() {
    let app = TestApp::new().await;
    let id = submit_idea(&app, "Paint the floor").await;
    let path = format!("/api/improvement-ideas/{}/reject", id);

    let (status, body) = app.post(&path, "manager", json!({"reviewComments": " "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(&body),
        "Review comments are required when rejecting an idea"
    );

    let idea = fetch_idea(&app, id).await;
    assert_eq!(idea["status"], "submitted");
    assert!(idea["reviewedBy"].is_null());
    assert!(idea["reviewComments"].is_null());

    let (status, body) = app
        .post(&path, "manager", json!({"reviewComments": "Out of budget"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["reviewComments"], "Out of budget");
}

#[tokio::test]
async fn test_idea_full_lifecycle() {
    let app = TestApp::new().await;
    let id = submit_idea(&app, "Visual management").await;
    let status_path = format!("/api/improvement-ideas/{}/status", id);
    assert_eq!(
        fetch_idea(&app, id).await["allowedActions"],
        json!(["review", "approve", "reject"])
    );

    let steps = [
        ("review", "manager", "under_review"),
        ("approve", "manager", "approved"),
        ("start", "user", "in_progress"),
        ("implement", "user", "implemented"),
        ("close", "user", "closed"),
    ];
    for (action, role, expected) in steps {
        let (status, body) = app
            .post(&status_path, role, json!({"action": action, "comments": "ok"}))
            .await;
        assert_eq!(status, StatusCode::OK, "{} failed: {}", action, body);
        assert_eq!(body["data"]["status"], expected);
    }

    assert_eq!(fetch_idea(&app, id).await["allowedActions"], json!([]));

    // Closed ideas are frozen
    let (status, _) = app
        .put(
            &format!("/api/improvement-ideas/{}", id),
            "manager",
            json!({"title": "Renamed"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, trail) = app
        .get(
            &format!("/api/audit-logs?entityType=improvement_idea&entityId={}&limit=50", id),
            "admin",
        )
        .await;
    let actions: Vec<&str> = trail["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    for action in ["create", "review", "approve", "start", "implement", "close"] {
        assert!(actions.contains(&action), "missing {} in {:?}", action, actions);
    }
}

#[tokio::test]
async fn test_unknown_action_rejected() {
    let app = TestApp::new().await;
    let id = submit_idea(&app, "Whatever").await;
    let (status, _) = app
        .post(
            &format!("/api/improvement-ideas/{}/status", id),
            "manager",
            json!({"action": "teleport"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_only_submitter_or_manager_updates() {
    let app = TestApp::new().await;
    let id = submit_idea(&app, "Original").await;
    let path = format!("/api/improvement-ideas/{}", id);

    let (status, _) = app.put(&path, "auditor", json!({"title": "Hijack"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.put(&path, "user", json!({"title": "Refined"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Refined");

    let (status, body) = app.put(&path, "manager", json!({"estimatedCost": -5.0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "estimatedCost must not be negative");
}

#[tokio::test]
async fn test_idea_list_filters_and_statistics() {
    let app = TestApp::new().await;
    let first = submit_idea(&app, "Alpha scheme").await;
    submit_idea(&app, "Beta scheme").await;
    submit_idea(&app, "Gamma plan").await;
    app.post(&format!("/api/improvement-ideas/{}/approve", first), "manager", json!({}))
        .await;

    let (status, page) = app
        .get("/api/improvement-ideas?search=scheme&limit=1&page=2", "viewer")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["page"], 2);
    assert_eq!(page["data"].as_array().unwrap().len(), 1);

    let (_, page) = app.get("/api/improvement-ideas?status=approved", "viewer").await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["data"][0]["id"], first);

    let (status, stats) = app.get("/api/improvement-ideas/statistics", "viewer").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["byStatus"]["submitted"], 2);
    assert_eq!(stats["byStatus"]["approved"], 1);
    assert_eq!(stats["byStatus"]["closed"], 0);
}

#[tokio::test]
async fn test_invalid_list_parameters() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/api/improvement-ideas?page=0", "viewer").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("Invalid pagination parameters"));

    let (status, body) = app
        .get("/api/improvement-ideas?page=9223372036854775807&limit=100", "viewer")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("Invalid pagination parameters"));

    let (status, _) = app.get("/api/improvement-ideas?sortBy=password", "viewer").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/improvement-ideas?status=maybe", "viewer").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submitter_withdraws_only_while_submitted() {
    let app = TestApp::new().await;
    let kept = submit_idea(&app, "Keep").await;
    let withdrawn = submit_idea(&app, "Withdraw").await;

    app.post(&format!("/api/improvement-ideas/{}/approve", kept), "manager", json!({}))
        .await;
    let (status, _) = app.delete(&format!("/api/improvement-ideas/{}", kept), "user").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .delete(&format!("/api/improvement-ideas/{}", withdrawn), "user")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Improvement idea deleted successfully");

    let (status, _) = app
        .get(&format!("/api/improvement-ideas/{}", withdrawn), "user")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete(&format!("/api/improvement-ideas/{}", kept), "admin").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_task_lifecycle_and_statistics() {
    let app = TestApp::new().await;
    let idea = submit_idea(&app, "Tooling").await;

    let first = app
        .create(
            "/api/implementation-tasks",
            "user",
            json!({"improvementIdeaId": idea, "taskName": "Order parts", "progressPercentage": 40}),
        )
        .await;
    app.create(
        "/api/implementation-tasks",
        "user",
        json!({"improvementIdeaId": idea, "taskName": "Train staff", "status": "blocked"}),
    )
    .await;

    let (status, body) = app
        .post(
            &format!("/api/implementation-tasks/{}/complete", first),
            "user",
            json!({"completionEvidence": "PO-1234"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["progressPercentage"], 100);
    assert_eq!(body["data"]["completionEvidence"], "PO-1234");
    let completed_date = body["data"]["completedDate"].as_str().unwrap();
    assert!(
        chrono::DateTime::parse_from_rfc3339(completed_date).is_ok(),
        "completedDate {}",
        completed_date
    );
    assert_eq!(body["data"]["updatedBy"], app.user("user").id);

    let (status, body) = app
        .post(&format!("/api/implementation-tasks/{}/complete", first), "user", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Task is already completed");

    let (status, stats) = app
        .get(&format!("/api/implementation-tasks/statistics/{}", idea), "viewer")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["blocked"], 1);
    assert_eq!(stats["avgProgress"], 50.0);

    let (_, page) = app
        .get(
            &format!("/api/implementation-tasks?improvementIdeaId={}&status=blocked", idea),
            "viewer",
        )
        .await;
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn test_task_needs_existing_idea() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/implementation-tasks",
            "user",
            json!({"improvementIdeaId": 999, "taskName": "Orphan"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "Improvement idea not found");

    let (status, _) = app.get("/api/implementation-tasks/statistics/999", "viewer").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_task_list_rejects_bad_pagination() {
    let app = TestApp::new().await;
    for query in [
        "page=0",
        "page=-2",
        "limit=0",
        "limit=-10",
        "page=abc",
        "page=1&limit=0",
        "page=9223372036854775807&limit=100",
    ] {
        let (status, body) = app
            .get(&format!("/api/implementation-tasks?{}", query), "viewer")
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", query);
        assert!(
            error_message(&body).contains("Invalid pagination parameters"),
            "{}: {}",
            query,
            body
        );
    }

    let (status, page) = app
        .get("/api/implementation-tasks?page=2&limit=500", "viewer")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["limit"], 100);
    assert_eq!(page["page"], 2);
}
