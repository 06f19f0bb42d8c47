//! Department endpoints

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
use crate::db::departments::{
    self, Department, DepartmentChanges, DepartmentFilter, DepartmentSort, NewDepartment,
};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "department";

fn not_found() -> ApiError {
    ApiError::NotFound("Department not found".to_string())
}

/// 409 naming the colliding column, if any
async fn check_unique(
    conn: &mut sqlx::SqliteConnection,
    code: &str,
    name: &str,
    exclude_id: Option<i64>,
) -> ApiResult<()> {
    match departments::find_duplicate(&mut *conn, code, name, exclude_id).await? {
        Some("code") => Err(ApiError::Conflict(format!(
            "Department with code '{}' already exists",
            code
        ))),
        Some(_) => Err(ApiError::Conflict(format!(
            "Department with name '{}' already exists",
            name
        ))),
        None => Ok(()),
    }
}

/// GET /api/departments
pub async fn list_departments(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<Department>>> {
    let params = ListParams::from(raw);
    let filter = DepartmentFilter {
        include_inactive: params.flag("includeInactive")?,
        search: params.text("search"),
    };
    let sort = params.sort(DepartmentSort::Name, SortDirection::Asc)?;
    let page = params.page()?;

    Ok(Json(departments::find_all(&state.db, &filter, &sort, page).await?))
}

/// POST /api/departments
pub async fn create_department(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewDepartment>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_level(&caller, level::MANAGER, "manage departments")?;
    let department = payload.normalized()?;

    let mut tx = state.db.begin().await?;
    check_unique(&mut *tx, &department.code, &department.name, None).await?;
    let id = departments::insert(&mut *tx, &department, caller.user_id).await?;
    let created = departments::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!("Department {} created by {}", created.code, caller.username);
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Department created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/departments/:id
pub async fn get_department(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Department>> {
    let department = departments::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(department))
}

/// PUT /api/departments/:id
pub async fn update_department(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<DepartmentChanges>,
) -> ApiResult<Json<Updated<Department>>> {
    require_level(&caller, level::MANAGER, "manage departments")?;

    let mut tx = state.db.begin().await?;
    let before = departments::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let mut department = before.clone();
    department.apply_changes(changes)?;
    check_unique(&mut *tx, &department.code, &department.name, Some(id)).await?;

    if !departments::update(&mut *tx, &department).await? {
        return Err(not_found());
    }
    let after = departments::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Department updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/departments/:id
///
/// Marks the department inactive.
pub async fn delete_department(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::MANAGER, "manage departments")?;

    let mut tx = state.db.begin().await?;
    let department = departments::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    departments::deactivate(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &department)).await?;
    tx.commit().await?;

    info!("Department {} deactivated by {}", department.code, caller.username);
    Ok(Json(Message::new("Department deleted successfully")))
}

/// Build department routes
pub fn department_routes() -> Router<AppState> {
    Router::new()
        .route("/api/departments", get(list_departments).post(create_department))
        .route(
            "/api/departments/:id",
            get(get_department).put(update_department).delete(delete_department),
        )
}
