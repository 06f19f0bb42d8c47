//! Audit finding endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use qms_common::status::AuditStatus;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_level, AuthUser};
use super::params::ListParams;
use super::{Created, Message, Updated};
use crate::db::findings::{
    self, AuditFinding, FindingChanges, FindingFilter, FindingSort, FindingStatistics, NewFinding,
};
use crate::db::{audits, ncrs};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "audit_finding";

fn not_found() -> ApiError {
    ApiError::NotFound("Audit finding not found".to_string())
}

fn audit_not_found() -> ApiError {
    ApiError::NotFound("Audit not found".to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkNcrRequest {
    pub ncr_id: i64,
}

/// GET /api/audit-findings
pub async fn list_findings(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<AuditFinding>>> {
    let params = ListParams::from(raw);
    let filter = FindingFilter {
        audit_id: params.id("auditId")?,
        severity: params.parsed("severity")?,
        status: params.parsed("status")?,
    };
    let sort = params.sort(FindingSort::CreatedAt, SortDirection::Desc)?;
    let page = params.page()?;

    Ok(Json(findings::find_all(&state.db, &filter, &sort, page).await?))
}

/// GET /api/audit-findings/:auditId/stats
pub async fn finding_statistics(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(audit_id): Path<i64>,
) -> ApiResult<Json<FindingStatistics>> {
    audits::find_by_id(&state.db, audit_id)
        .await?
        .ok_or_else(audit_not_found)?;
    Ok(Json(findings::statistics(&state.db, audit_id).await?))
}

/// POST /api/audit-findings
///
/// Findings cannot be added to closed or cancelled audits.
pub async fn create_finding(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewFinding>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_level(&caller, level::AUDITOR, "record audit findings")?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    let audit = audits::find_by_id(&mut *tx, payload.audit_id)
        .await?
        .ok_or_else(audit_not_found)?;
    if matches!(audit.status, AuditStatus::Closed | AuditStatus::Cancelled) {
        return Err(ApiError::BadRequest(format!(
            "Cannot add findings to audit with status '{}'",
            audit.status
        )));
    }

    let id = findings::insert(&mut *tx, &payload, caller.user_id).await?;
    let created = findings::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!("Finding {} recorded against audit {}", id, audit.audit_number);
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Audit finding created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/audit-findings/:id
pub async fn get_finding(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<AuditFinding>> {
    let finding = findings::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(finding))
}

/// PUT /api/audit-findings/:id
pub async fn update_finding(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<FindingChanges>,
) -> ApiResult<Json<Updated<AuditFinding>>> {
    require_level(&caller, level::AUDITOR, "edit audit findings")?;

    let mut tx = state.db.begin().await?;
    let before = findings::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let mut finding = before.clone();
    finding.apply_changes(changes)?;
    findings::update(&mut *tx, &finding).await?;

    let after = findings::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Audit finding updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/audit-findings/:id
pub async fn delete_finding(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::AUDITOR, "delete audit findings")?;

    let mut tx = state.db.begin().await?;
    let finding = findings::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    findings::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &finding)).await?;
    tx.commit().await?;

    Ok(Json(Message::new("Audit finding deleted successfully")))
}

/// POST /api/audit-findings/:id/link-ncr
///
/// Links the finding to an existing NCR and marks it as requiring one.
pub async fn link_ncr(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<LinkNcrRequest>,
) -> ApiResult<Json<Updated<AuditFinding>>> {
    require_level(&caller, level::AUDITOR, "link findings to NCRs")?;

    let mut tx = state.db.begin().await?;
    let before = findings::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let ncr = ncrs::find_by_id(&mut *tx, payload.ncr_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("NCR not found".to_string()))?;

    let mut finding = before.clone();
    finding.ncr_id = Some(ncr.id);
    finding.requires_ncr = true;
    findings::update(&mut *tx, &finding).await?;

    let after = findings::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(
        &mut *tx,
        &caller,
        AuditEvent::changed("link_ncr", ENTITY, id, &before, &after)
            .with_details(format!("Linked to {}", ncr.ncr_number)),
    )
    .await?;
    tx.commit().await?;

    info!("Finding {} linked to {}", id, ncr.ncr_number);
    Ok(Json(Updated {
        message: format!("Audit finding linked to {}", ncr.ncr_number),
        data: after,
    }))
}

/// Build audit finding routes
///
/// The stats route reuses the `:id` segment name because the router does
/// not allow two parameter names at one position; it carries an audit id.
pub fn finding_routes() -> Router<AppState> {
    Router::new()
        .route("/api/audit-findings", get(list_findings).post(create_finding))
        .route(
            "/api/audit-findings/:id",
            get(get_finding).put(update_finding).delete(delete_finding),
        )
        .route("/api/audit-findings/:id/stats", get(finding_statistics))
        .route("/api/audit-findings/:id/link-ncr", post(link_ncr))
}
