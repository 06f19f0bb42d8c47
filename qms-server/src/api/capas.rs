//! CAPA endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use qms_common::status::{CapaAction, CapaStatus};
use qms_common::workflow;
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_level, require_writer, AuthUser};
use super::params::ListParams;
use super::{guarded_update, Created, Message, TransitionRequest, Updated, WithActions};
use crate::db::capas::{self, Capa, CapaChanges, CapaFilter, CapaSort, NewCapa};
use crate::db::ncrs;
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "capa";

fn not_found() -> ApiError {
    ApiError::NotFound("CAPA not found".to_string())
}

async fn ensure_ncr_exists(
    conn: &mut sqlx::SqliteConnection,
    ncr_id: Option<i64>,
) -> ApiResult<()> {
    if let Some(ncr_id) = ncr_id {
        ncrs::find_by_id(&mut *conn, ncr_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("NCR not found".to_string()))?;
    }
    Ok(())
}

/// GET /api/capas
pub async fn list_capas(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<Capa>>> {
    let params = ListParams::from(raw);
    let filter = CapaFilter {
        status: params.parsed("status")?,
        capa_type: params.parsed("capaType")?,
        priority: params.parsed("priority")?,
        ncr_id: params.id("ncrId")?,
    };
    let sort = params.sort(CapaSort::CreatedAt, SortDirection::Desc)?;
    let page = params.page()?;

    Ok(Json(capas::find_all(&state.db, &filter, &sort, page).await?))
}

/// POST /api/capas
pub async fn create_capa(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewCapa>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_writer(&caller)?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    ensure_ncr_exists(&mut *tx, payload.ncr_id).await?;
    let id = capas::insert(&mut *tx, &payload, caller.user_id).await?;
    let created = capas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!("{} opened by {}", created.capa_number, caller.username);
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "CAPA created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/capas/:id
pub async fn get_capa(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<WithActions<Capa>>> {
    let capa = capas::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    let status = capa.status;
    Ok(Json(WithActions::new(capa, status)))
}

/// PUT /api/capas/:id
pub async fn update_capa(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<CapaChanges>,
) -> ApiResult<Json<Updated<Capa>>> {
    require_writer(&caller)?;

    let mut tx = state.db.begin().await?;
    let before = capas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    if before.status == CapaStatus::Closed {
        return Err(ApiError::BadRequest(format!(
            "Cannot update CAPA with status '{}'",
            before.status
        )));
    }
    ensure_ncr_exists(&mut *tx, changes.ncr_id).await?;

    let mut capa = before.clone();
    capa.apply_changes(changes)?;
    guarded_update(
        capas::update(&mut *tx, &capa, Some(before.status)).await,
        "CAPA",
    )?;

    let after = capas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "CAPA updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/capas/:id
pub async fn delete_capa(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::MANAGER, "delete CAPAs")?;

    let mut tx = state.db.begin().await?;
    let capa = capas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    capas::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &capa)).await?;
    tx.commit().await?;

    info!("{} deleted by {}", capa.capa_number, caller.username);
    Ok(Json(Message::new("CAPA deleted successfully")))
}

/// POST /api/capas/:id/status
///
/// `verify` needs a manager and non-empty comments, which become the
/// effectiveness notes.
pub async fn change_capa_status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<TransitionRequest>,
) -> ApiResult<Json<Updated<Capa>>> {
    let action: CapaAction = payload.action.trim().parse()?;
    let comments = payload.comments();
    match action {
        CapaAction::Verify | CapaAction::Close => {
            require_level(&caller, level::MANAGER, "verify or close CAPAs")?
        }
        _ => require_writer(&caller)?,
    }
    if action == CapaAction::Verify && comments.is_none() {
        return Err(ApiError::BadRequest(
            "Verification comments are required".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;
    let before = capas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;

    let mut capa = before.clone();
    capa.status = workflow::apply(before.status, action)?;
    match action {
        CapaAction::Complete => capa.completed_date = Some(qms_common::time::now()),
        CapaAction::Reopen => capa.completed_date = None,
        CapaAction::Verify => {
            capa.verified_by = Some(caller.user_id);
            capa.verified_date = Some(qms_common::time::now());
            capa.effectiveness_notes = comments.clone();
        }
        CapaAction::Start | CapaAction::Close => {}
    }

    guarded_update(
        capas::update(&mut *tx, &capa, Some(before.status)).await,
        "CAPA",
    )?;

    let after = capas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let mut event = AuditEvent::changed(action.as_str(), ENTITY, id, &before, &after);
    if let Some(comments) = comments {
        event = event.with_details(comments);
    }
    audit_log::record(&mut *tx, &caller, event).await?;
    tx.commit().await?;

    info!(
        "{} {} -> {} by {}",
        after.capa_number, before.status, after.status, caller.username
    );
    Ok(Json(Updated {
        message: format!("CAPA status updated to '{}'", after.status),
        data: after,
    }))
}

/// Build CAPA routes
pub fn capa_routes() -> Router<AppState> {
    Router::new()
        .route("/api/capas", get(list_capas).post(create_capa))
        .route("/api/capas/:id", get(get_capa).put(update_capa).delete(delete_capa))
        .route("/api/capas/:id/status", post(change_capa_status))
}
