//! Audit endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use qms_common::status::{AuditAction, AuditStatus};
use qms_common::workflow;
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_level, AuthUser};
use super::params::ListParams;
use super::{guarded_update, Created, Message, TransitionRequest, Updated, WithActions};
use crate::db::audits::{self, Audit, AuditChanges, AuditFilter, AuditSort, NewAudit};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "audit";

fn not_found() -> ApiError {
    ApiError::NotFound("Audit not found".to_string())
}

/// GET /api/audits
pub async fn list_audits(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<Audit>>> {
    let params = ListParams::from(raw);
    let filter = AuditFilter {
        status: params.parsed("status")?,
        audit_type: params.parsed("auditType")?,
        department_id: params.id("departmentId")?,
        scheduled: params.date_range()?,
    };
    let sort = params.sort(AuditSort::ScheduledDate, SortDirection::Desc)?;
    let page = params.page()?;

    Ok(Json(audits::find_all(&state.db, &filter, &sort, page).await?))
}

/// POST /api/audits
pub async fn create_audit(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewAudit>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_level(&caller, level::AUDITOR, "plan audits")?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    let id = audits::insert(&mut *tx, &payload, caller.user_id).await?;
    let created = audits::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!("Audit {} scheduled for {}", created.audit_number, created.scheduled_date);
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Audit created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/audits/:id
pub async fn get_audit(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<WithActions<Audit>>> {
    let audit = audits::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    let status = audit.status;
    Ok(Json(WithActions::new(audit, status)))
}

/// PUT /api/audits/:id
///
/// Closed and cancelled audits are read-only.
pub async fn update_audit(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<AuditChanges>,
) -> ApiResult<Json<Updated<Audit>>> {
    require_level(&caller, level::AUDITOR, "edit audits")?;

    let mut tx = state.db.begin().await?;
    let before = audits::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    if matches!(before.status, AuditStatus::Closed | AuditStatus::Cancelled) {
        return Err(ApiError::BadRequest(format!(
            "Cannot update audit with status '{}'",
            before.status
        )));
    }

    let mut audit = before.clone();
    audit.apply_changes(changes)?;
    guarded_update(
        audits::update(&mut *tx, &audit, Some(before.status)).await,
        "Audit",
    )?;

    let after = audits::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Audit updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/audits/:id
///
/// Findings are deleted with the audit.
pub async fn delete_audit(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::MANAGER, "delete audits")?;

    let mut tx = state.db.begin().await?;
    let audit = audits::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audits::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &audit)).await?;
    tx.commit().await?;

    info!("Audit {} deleted by {}", audit.audit_number, caller.username);
    Ok(Json(Message::new("Audit deleted successfully")))
}

/// POST /api/audits/:id/status
///
/// `start` stamps the actual start date and `complete` the end date.
pub async fn change_audit_status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<TransitionRequest>,
) -> ApiResult<Json<Updated<Audit>>> {
    require_level(&caller, level::AUDITOR, "change audit status")?;
    let action: AuditAction = payload.action.trim().parse()?;

    let mut tx = state.db.begin().await?;
    let before = audits::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;

    let mut audit = before.clone();
    audit.status = workflow::apply(before.status, action)?;
    match action {
        AuditAction::Start => audit.actual_start_date = Some(qms_common::time::today()),
        AuditAction::Complete => audit.actual_end_date = Some(qms_common::time::today()),
        AuditAction::Close | AuditAction::Cancel => {}
    }

    guarded_update(
        audits::update(&mut *tx, &audit, Some(before.status)).await,
        "Audit",
    )?;

    let after = audits::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let mut event = AuditEvent::changed(action.as_str(), ENTITY, id, &before, &after);
    if let Some(comments) = payload.comments() {
        event = event.with_details(comments);
    }
    audit_log::record(&mut *tx, &caller, event).await?;
    tx.commit().await?;

    info!(
        "Audit {} {} -> {} by {}",
        after.audit_number, before.status, after.status, caller.username
    );
    Ok(Json(Updated {
        message: format!("Audit status updated to '{}'", after.status),
        data: after,
    }))
}

/// Build audit routes
pub fn audit_routes() -> Router<AppState> {
    Router::new()
        .route("/api/audits", get(list_audits).post(create_audit))
        .route(
            "/api/audits/:id",
            get(get_audit).put(update_audit).delete(delete_audit),
        )
        .route("/api/audits/:id/status", post(change_audit_status))
}
