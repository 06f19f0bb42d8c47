//! Audits, findings, NCRs and CAPAs over HTTP

mod helpers;

use axum::http::StatusCode;
use helpers::{error_message, TestApp};
use serde_json::json;

async fn plan_audit(app: &TestApp, title: &str, date: &str) -> i64 {
    app.create(
        "/api/audits",
        "auditor",
        json!({
            "title": title,
            "auditType": "internal",
            "scope": "Warehouse",
            "scheduledDate": date
        }),
    )
    .await
}

async fn open_ncr(app: &TestApp, title: &str) -> i64 {
    app.create(
        "/api/ncrs",
        "user",
        json!({
            "title": title,
            "description": "Label mismatch on pallet",
            "source": "internal",
            "severity": "major"
        }),
    )
    .await
}

async fn transition(app: &TestApp, path: &str, role: &str, action: &str) -> (StatusCode, serde_json::Value) {
    app.post(path, role, json!({"action": action, "comments": format!("{} done", action)}))
        .await
}

#[tokio::test]
async fn test_audit_requires_auditor() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/audits",
            "user",
            json!({"title": "Q1", "auditType": "internal", "scheduledDate": "2026-03-01"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "Insufficient permissions to plan audits");
}

#[tokio::test]
async fn test_audit_lifecycle() {
    let app = TestApp::new().await;
    let id = plan_audit(&app, "ISO 9001 internal", "2026-03-01").await;
    let path = format!("/api/audits/{}/status", id);

    let (_, audit) = app.get(&format!("/api/audits/{}", id), "viewer").await;
    assert_eq!(audit["auditNumber"], "AUD-0001");
    assert_eq!(audit["status"], "planned");

    // Cannot complete before starting
    let (status, body) = transition(&app, &path, "auditor", "complete").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Cannot complete audit with status 'planned'");

    for (action, expected) in [("start", "in_progress"), ("complete", "completed"), ("close", "closed")] {
        let (status, body) = transition(&app, &path, "auditor", action).await;
        assert_eq!(status, StatusCode::OK, "{}: {}", action, body);
        assert_eq!(body["data"]["status"], expected);
    }

    let (status, body) = app
        .put(&format!("/api/audits/{}", id), "auditor", json!({"title": "Late edit"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Cannot update audit with status 'closed'");
}

#[tokio::test]
async fn test_audit_list_date_window() {
    let app = TestApp::new().await;
    plan_audit(&app, "January", "2026-01-15").await;
    plan_audit(&app, "February", "2026-02-15").await;
    plan_audit(&app, "March", "2026-03-15").await;

    let (status, page) = app
        .get("/api/audits?startDate=2026-02-01&endDate=2026-03-15&sortBy=scheduledDate&sortOrder=asc", "viewer")
        .await;
    assert_eq!(status, StatusCode::OK, "{}", page);
    assert_eq!(page["total"], 2);
    assert_eq!(page["data"][0]["title"], "February");
    assert_eq!(page["data"][1]["title"], "March");

    let (status, _) = app
        .get("/api/audits?startDate=2026-04-01&endDate=2026-03-01", "viewer")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_findings_and_statistics() {
    let app = TestApp::new().await;
    let audit = plan_audit(&app, "Supplier review", "2026-05-10").await;

    for (title, severity) in [("Missing record", "minor"), ("Expired cert", "major"), ("Dusty shelf", "observation")] {
        app.create(
            "/api/audit-findings",
            "auditor",
            json!({"auditId": audit, "title": title, "severity": severity}),
        )
        .await;
    }

    let (status, stats) = app
        .get(&format!("/api/audit-findings/{}/stats", audit), "viewer")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["bySeverity"]["major"], 1);
    assert_eq!(stats["bySeverity"]["critical"], 0);
    assert_eq!(stats["byStatus"]["open"], 3);

    let (_, page) = app
        .get(&format!("/api/audit-findings?auditId={}&severity=major", audit), "viewer")
        .await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["data"][0]["auditNumber"], "AUD-0001");

    let (status, _) = app.get("/api/audit-findings/999/stats", "viewer").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_no_findings_on_closed_audit() {
    let app = TestApp::new().await;
    let audit = plan_audit(&app, "Short audit", "2026-05-10").await;
    let (status, _) = transition(&app, &format!("/api/audits/{}/status", audit), "auditor", "cancel").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/api/audit-findings",
            "auditor",
            json!({"auditId": audit, "title": "Too late", "severity": "minor"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(&body),
        "Cannot add findings to audit with status 'cancelled'"
    );
}

#[tokio::test]
async fn test_link_finding_to_ncr() {
    let app = TestApp::new().await;
    let audit = plan_audit(&app, "Line audit", "2026-06-01").await;
    let finding = app
        .create(
            "/api/audit-findings",
            "auditor",
            json!({"auditId": audit, "title": "Wrong torque", "severity": "critical"}),
        )
        .await;
    let ncr = open_ncr(&app, "Torque out of spec").await;

    let (status, body) = app
        .post(
            &format!("/api/audit-findings/{}/link-ncr", finding),
            "auditor",
            json!({"ncrId": ncr}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Audit finding linked to NCR-0001");
    assert_eq!(body["data"]["ncrId"], ncr);
    assert_eq!(body["data"]["requiresNcr"], true);

    let (status, _) = app
        .post(
            &format!("/api/audit-findings/{}/link-ncr", finding),
            "auditor",
            json!({"ncrId": 4242}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleting_audit_removes_findings() {
    let app = TestApp::new().await;
    let audit = plan_audit(&app, "Disposable", "2026-07-01").await;
    let finding = app
        .create(
            "/api/audit-findings",
            "auditor",
            json!({"auditId": audit, "title": "Gone soon", "severity": "minor"}),
        )
        .await;

    let (status, _) = app.delete(&format!("/api/audits/{}", audit), "auditor").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.delete(&format!("/api/audits/{}", audit), "manager").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .get(&format!("/api/audit-findings/{}", finding), "viewer")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ncr_workflow() {
    let app = TestApp::new().await;
    let id = open_ncr(&app, "Scratched housings").await;
    let path = format!("/api/ncrs/{}/status", id);

    let (_, ncr) = app.get(&format!("/api/ncrs/{}", id), "viewer").await;
    assert_eq!(ncr["ncrNumber"], "NCR-0001");
    assert_eq!(ncr["status"], "open");
    assert!(ncr["detectedDate"].is_string());
    assert_eq!(ncr["allowedActions"], json!(["investigate", "cancel"]));

    for action in ["investigate", "resolve"] {
        let (status, body) = transition(&app, &path, "user", action).await;
        assert_eq!(status, StatusCode::OK, "{}: {}", action, body);
    }

    // Closing needs a manager
    let (status, _) = transition(&app, &path, "user", "close").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = transition(&app, &path, "manager", "close").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "closed");
    assert!(body["data"]["closedDate"].is_string());

    let (status, _) = transition(&app, &path, "manager", "reopen").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, trail) = app
        .get(&format!("/api/audit-logs?entityType=ncr&entityId={}&action=close", id), "admin")
        .await;
    assert_eq!(trail["total"], 1);
    assert_eq!(trail["data"][0]["details"], "close done");
    assert_eq!(trail["data"][0]["oldValues"]["status"], "resolved");
    assert_eq!(trail["data"][0]["newValues"]["status"], "closed");
}

#[tokio::test]
async fn test_ncr_reopen_clears_resolution() {
    let app = TestApp::new().await;
    let id = open_ncr(&app, "Bent pins").await;
    let path = format!("/api/ncrs/{}/status", id);

    for action in ["investigate", "resolve", "reopen"] {
        let (status, _) = transition(&app, &path, "user", action).await;
        assert_eq!(status, StatusCode::OK, "{}", action);
    }
    let (_, ncr) = app.get(&format!("/api/ncrs/{}", id), "viewer").await;
    assert_eq!(ncr["status"], "open");
    assert!(ncr["closedDate"].is_null());

    transition(&app, &path, "user", "investigate").await;
    transition(&app, &path, "user", "resolve").await;
    let (_, ncr) = app.get(&format!("/api/ncrs/{}", id), "viewer").await;
    assert_eq!(ncr["allowedActions"], json!(["reopen", "close"]));
}

#[tokio::test]
async fn test_capa_verification_flow() {
    let app = TestApp::new().await;
    let ncr = open_ncr(&app, "Wrong resin").await;
    let capa = app
        .create(
            "/api/capas",
            "user",
            json!({
                "title": "Supplier incoming inspection",
                "capaType": "corrective",
                "ncrId": ncr,
                "priority": "high"
            }),
        )
        .await;
    let path = format!("/api/capas/{}/status", capa);

    let (_, record) = app.get(&format!("/api/capas/{}", capa), "viewer").await;
    assert_eq!(record["capaNumber"], "CAPA-0001");
    assert_eq!(record["status"], "open");

    for action in ["start", "complete"] {
        let (status, _) = transition(&app, &path, "user", action).await;
        assert_eq!(status, StatusCode::OK, "{}", action);
    }

    // Close before verify is an illegal transition
    let (status, body) = transition(&app, &path, "manager", "close").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Cannot close CAPA with status 'completed'");

    let (status, body) = app.post(&path, "manager", json!({"action": "verify"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Verification comments are required");

    let (status, body) = app
        .post(&path, "manager", json!({"action": "verify", "comments": "No recurrence in 90 days"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "verified");
    assert_eq!(body["data"]["verifiedBy"], app.user("manager").id);
    assert_eq!(body["data"]["effectivenessNotes"], "No recurrence in 90 days");

    let (status, body) = transition(&app, &path, "manager", "close").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "closed");

    let (_, page) = app.get(&format!("/api/capas?ncrId={}", ncr), "viewer").await;
    assert_eq!(page["total"], 1);
}

#[tokio::test]
async fn test_capa_needs_existing_ncr() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post(
            "/api/capas",
            "user",
            json!({"title": "Orphan", "capaType": "preventive", "ncrId": 77}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "NCR not found");
}
