//! Evidence pack generation

mod helpers;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use helpers::{body_bytes, error_message, json_response, TestApp};
use qms_common::Result;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use qms_server::services::evidence_pack::{EvidencePack, EvidencePackRenderer, Line};
use qms_server::{build_router, AppState};

/// Plain-text renderer so tests can inspect the outline
struct TextRenderer;

impl EvidencePackRenderer for TextRenderer {
    fn content_type(&self) -> &'static str {
        "text/plain; charset=utf-8"
    }

    fn file_extension(&self) -> &'static str {
        "txt"
    }

    fn render(&self, pack: &EvidencePack) -> Result<Vec<u8>> {
        let text: Vec<String> = pack
            .outline()
            .into_iter()
            .map(|line| match line {
                Line::Title(t) => format!("# {}", t),
                Line::Heading(t) => format!("## {}", t),
                Line::Text(t) => t,
                Line::Blank => String::new(),
            })
            .collect();
        Ok(text.join("\n").into_bytes())
    }
}

async fn seed_records(app: &TestApp) {
    app.create(
        "/api/audits",
        "auditor",
        json!({"title": "Spring audit", "auditType": "internal", "scheduledDate": "2026-04-02"}),
    )
    .await;
    app.create(
        "/api/ncrs",
        "user",
        json!({"title": "Cracked weld", "source": "internal", "severity": "critical"}),
    )
    .await;
    app.create("/api/improvement-ideas", "user", json!({"title": "Weld jig"}))
        .await;
}

fn generate_request(token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/evidence-pack/generate")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_generates_pdf_attachment() {
    let app = TestApp::new().await;
    seed_records(&app).await;

    let response = app
        .send(
            Method::POST,
            "/api/evidence-pack/generate",
            Some(app.token("auditor")),
            Some(json!({})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "application/pdf"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"QMS_Evidence_Pack_"));
    assert!(disposition.ends_with(".pdf\""));

    let bytes = body_bytes(response).await;
    assert!(bytes.starts_with(b"%PDF-"));

    let (_, trail) = app
        .get("/api/audit-logs?entityType=evidence_pack&action=generate", "admin")
        .await;
    assert_eq!(trail["total"], 1);
    assert!(trail["data"][0]["details"]
        .as_str()
        .unwrap()
        .starts_with("All records;"));
}

#[tokio::test]
async fn test_body_is_optional() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Method::POST,
            "/api/evidence-pack/generate",
            Some(app.token("auditor")),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_requires_auditor() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post("/api/evidence-pack/generate", "user", json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        error_message(&body),
        "Insufficient permissions to generate evidence packs"
    );
}

#[tokio::test]
async fn test_rejects_inverted_period() {
    let app = TestApp::new().await;
    let (status, _) = app
        .post(
            "/api/evidence-pack/generate",
            "auditor",
            json!({"startDate": "2026-05-01", "endDate": "2026-04-01"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sections_follow_request() {
    let app = TestApp::new().await;
    seed_records(&app).await;
    let router = build_router(
        AppState::new(app.pool.clone(), app.backup_dir.clone()).with_renderer(Arc::new(TextRenderer)),
    );

    let request = generate_request(
        app.token("auditor"),
        json!({"includeAuditLog": false, "includeImprovementIdeas": false}),
    );
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .ends_with(".txt\""));

    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.starts_with("# QMS Evidence Pack"));
    assert!(text.contains("## Audits (1)"), "{}", text);
    assert!(text.contains("AUD-0001  Spring audit  [planned]"));
    assert!(text.contains("## Audit Findings (0)"));
    assert!(text.contains("## Non-Conformance Reports (1)"));
    assert!(text.contains("NCR-0001  Cracked weld"));
    assert!(!text.contains("Improvement Ideas"));
    assert!(!text.contains("Audit Trail"));

    // Audits are filtered by scheduled date
    let request = generate_request(
        app.token("auditor"),
        json!({"startDate": "2026-05-01", "endDate": "2026-05-31", "includeAuditLog": false}),
    );
    let response = router.oneshot(request).await.unwrap();
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("Period: 2026-05-01 to 2026-05-31"));
    assert!(text.contains("## Audits (0)"));
}

#[tokio::test]
async fn test_generation_is_audited_with_period() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Method::POST,
            "/api/evidence-pack/generate",
            Some(app.token("manager")),
            Some(json!({"startDate": "2026-01-01"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (status, trail) = app
        .get("/api/audit-logs?entityType=evidence_pack", "admin")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(trail["data"][0]["username"], "manager_user");
    assert!(trail["data"][0]["details"]
        .as_str()
        .unwrap()
        .starts_with("From 2026-01-01;"));

    let (status, _) = json_response(
        app.send(Method::POST, "/api/evidence-pack/generate", None, None)
            .await,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ideas_list_their_tasks() {
    let app = TestApp::new().await;
    let idea = app
        .create("/api/improvement-ideas", "user", json!({"title": "Poka-yoke fixture"}))
        .await;
    app.create(
        "/api/implementation-tasks",
        "user",
        json!({"improvementIdeaId": idea, "taskName": "Design fixture", "progressPercentage": 60}),
    )
    .await;
    app.create("/api/improvement-ideas", "user", json!({"title": "No tasks yet"}))
        .await;

    let router = build_router(
        AppState::new(app.pool.clone(), app.backup_dir.clone()).with_renderer(Arc::new(TextRenderer)),
    );
    let request = generate_request(
        app.token("auditor"),
        json!({
            "includeAudits": false,
            "includeFindings": false,
            "includeNcrs": false,
            "includeCapas": false,
            "includeAuditLog": false
        }),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("## Improvement Ideas (2)"), "{}", text);
    assert!(text.contains("IDEA-0001  Poka-yoke fixture  [submitted]"));
    assert!(text.contains("    Task: Design fixture  [pending]  60%  Assigned to: -"));
    assert_eq!(text.matches("    Task: ").count(), 1);
}
