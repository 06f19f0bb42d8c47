//! Business process endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_level, AuthUser};
use super::params::ListParams;
use super::{Created, Message, Updated};
use crate::db::departments;
use crate::db::processes::{self, NewProcess, Process, ProcessChanges, ProcessFilter, ProcessSort};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "process";

fn not_found() -> ApiError {
    ApiError::NotFound("Process not found".to_string())
}

async fn check_unique(
    conn: &mut sqlx::SqliteConnection,
    code: &str,
    name: &str,
    exclude_id: Option<i64>,
) -> ApiResult<()> {
    match processes::find_duplicate(&mut *conn, code, name, exclude_id).await? {
        Some("code") => Err(ApiError::Conflict(format!(
            "Process with code '{}' already exists",
            code
        ))),
        Some(_) => Err(ApiError::Conflict(format!(
            "Process with name '{}' already exists",
            name
        ))),
        None => Ok(()),
    }
}

async fn ensure_department_exists(
    conn: &mut sqlx::SqliteConnection,
    department_id: Option<i64>,
) -> ApiResult<()> {
    if let Some(department_id) = department_id {
        departments::find_by_id(&mut *conn, department_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Department not found".to_string()))?;
    }
    Ok(())
}

/// GET /api/processes
pub async fn list_processes(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<Process>>> {
    let params = ListParams::from(raw);
    let filter = ProcessFilter {
        include_inactive: params.flag("includeInactive")?,
        search: params.text("search"),
        department_id: params.id("departmentId")?,
    };
    let sort = params.sort(ProcessSort::Name, SortDirection::Asc)?;
    let page = params.page()?;

    Ok(Json(processes::find_all(&state.db, &filter, &sort, page).await?))
}

/// POST /api/processes
pub async fn create_process(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewProcess>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_level(&caller, level::MANAGER, "manage processes")?;
    let process = payload.normalized()?;

    let mut tx = state.db.begin().await?;
    ensure_department_exists(&mut *tx, process.department_id).await?;
    check_unique(&mut *tx, &process.code, &process.name, None).await?;
    let id = processes::insert(&mut *tx, &process, caller.user_id).await?;
    let created = processes::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!("Process {} created by {}", created.code, caller.username);
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Process created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/processes/:id
pub async fn get_process(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Process>> {
    let process = processes::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(process))
}

/// PUT /api/processes/:id
pub async fn update_process(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<ProcessChanges>,
) -> ApiResult<Json<Updated<Process>>> {
    require_level(&caller, level::MANAGER, "manage processes")?;

    let mut tx = state.db.begin().await?;
    let before = processes::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    ensure_department_exists(&mut *tx, changes.department_id).await?;
    let mut process = before.clone();
    process.apply_changes(changes)?;
    check_unique(&mut *tx, &process.code, &process.name, Some(id)).await?;

    if !processes::update(&mut *tx, &process).await? {
        return Err(not_found());
    }
    let after = processes::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Process updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/processes/:id
pub async fn delete_process(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::MANAGER, "manage processes")?;

    let mut tx = state.db.begin().await?;
    let process = processes::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    processes::deactivate(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &process)).await?;
    tx.commit().await?;

    info!("Process {} deactivated by {}", process.code, caller.username);
    Ok(Json(Message::new("Process deleted successfully")))
}

/// Build process routes
pub fn process_routes() -> Router<AppState> {
    Router::new()
        .route("/api/processes", get(list_processes).post(create_process))
        .route(
            "/api/processes/:id",
            get(get_process).put(update_process).delete(delete_process),
        )
}
