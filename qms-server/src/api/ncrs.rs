//! Non-conformance report endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use qms_common::status::{NcrAction, NcrStatus};
use qms_common::workflow;
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_level, require_writer, AuthUser};
use super::params::ListParams;
use super::{guarded_update, Created, Message, TransitionRequest, Updated, WithActions};
use crate::db::ncrs::{self, NewNcr, Ncr, NcrChanges, NcrFilter, NcrSort};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "ncr";

fn not_found() -> ApiError {
    ApiError::NotFound("NCR not found".to_string())
}

/// GET /api/ncrs
pub async fn list_ncrs(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<Ncr>>> {
    let params = ListParams::from(raw);
    let filter = NcrFilter {
        status: params.parsed("status")?,
        severity: params.parsed("severity")?,
        source: params.parsed("source")?,
        department_id: params.id("departmentId")?,
        detected: params.date_range()?,
    };
    let sort = params.sort(NcrSort::DetectedDate, SortDirection::Desc)?;
    let page = params.page()?;

    Ok(Json(ncrs::find_all(&state.db, &filter, &sort, page).await?))
}

/// POST /api/ncrs
pub async fn create_ncr(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewNcr>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_writer(&caller)?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    let id = ncrs::insert(&mut *tx, &payload, caller.user_id).await?;
    let created = ncrs::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!(
        "{} raised ({} severity) by {}",
        created.ncr_number, created.severity, caller.username
    );
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "NCR created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/ncrs/:id
pub async fn get_ncr(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<WithActions<Ncr>>> {
    let ncr = ncrs::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    let status = ncr.status;
    Ok(Json(WithActions::new(ncr, status)))
}

/// PUT /api/ncrs/:id
pub async fn update_ncr(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<NcrChanges>,
) -> ApiResult<Json<Updated<Ncr>>> {
    require_writer(&caller)?;

    let mut tx = state.db.begin().await?;
    let before = ncrs::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    if matches!(before.status, NcrStatus::Closed | NcrStatus::Cancelled) {
        return Err(ApiError::BadRequest(format!(
            "Cannot update NCR with status '{}'",
            before.status
        )));
    }

    let mut ncr = before.clone();
    ncr.apply_changes(changes)?;
    guarded_update(
        ncrs::update(&mut *tx, &ncr, Some(before.status)).await,
        "NCR",
    )?;

    let after = ncrs::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "NCR updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/ncrs/:id
///
/// Linked CAPAs and findings keep their rows with the link cleared.
pub async fn delete_ncr(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::MANAGER, "delete NCRs")?;

    let mut tx = state.db.begin().await?;
    let ncr = ncrs::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    ncrs::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &ncr)).await?;
    tx.commit().await?;

    info!("{} deleted by {}", ncr.ncr_number, caller.username);
    Ok(Json(Message::new("NCR deleted successfully")))
}

/// POST /api/ncrs/:id/status
///
/// Closing and cancelling need a manager; `close` stamps `closedDate`.
pub async fn change_ncr_status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<TransitionRequest>,
) -> ApiResult<Json<Updated<Ncr>>> {
    let action: NcrAction = payload.action.trim().parse()?;
    match action {
        NcrAction::Close | NcrAction::Cancel => {
            require_level(&caller, level::MANAGER, "close or cancel NCRs")?
        }
        _ => require_writer(&caller)?,
    }

    let mut tx = state.db.begin().await?;
    let before = ncrs::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;

    let mut ncr = before.clone();
    ncr.status = workflow::apply(before.status, action)?;
    match action {
        NcrAction::Close => ncr.closed_date = Some(qms_common::time::now()),
        NcrAction::Reopen => ncr.closed_date = None,
        NcrAction::Investigate | NcrAction::Resolve | NcrAction::Cancel => {}
    }

    guarded_update(
        ncrs::update(&mut *tx, &ncr, Some(before.status)).await,
        "NCR",
    )?;

    let after = ncrs::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let mut event = AuditEvent::changed(action.as_str(), ENTITY, id, &before, &after);
    if let Some(comments) = payload.comments() {
        event = event.with_details(comments);
    }
    audit_log::record(&mut *tx, &caller, event).await?;
    tx.commit().await?;

    info!(
        "{} {} -> {} by {}",
        after.ncr_number, before.status, after.status, caller.username
    );
    Ok(Json(Updated {
        message: format!("NCR status updated to '{}'", after.status),
        data: after,
    }))
}

/// Build NCR routes
pub fn ncr_routes() -> Router<AppState> {
    Router::new()
        .route("/api/ncrs", get(list_ncrs).post(create_ncr))
        .route("/api/ncrs/:id", get(get_ncr).put(update_ncr).delete(delete_ncr))
        .route("/api/ncrs/:id/status", post(change_ncr_status))
}
