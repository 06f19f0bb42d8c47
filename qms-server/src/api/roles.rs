//! Role endpoints (admin only)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use qms_common::auth::{level, Caller, SUPERUSER_ROLE};
use tracing::info;

use super::auth::{require_level, AuthUser};
use super::{Created, Message, Updated};
use crate::db::roles::{self, NewRole, Role, RoleChanges};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "role";

fn not_found() -> ApiError {
    ApiError::NotFound("Role not found".to_string())
}

/// Nobody can hand out a level above their own
fn ensure_grantable(caller: &Caller, role_level: i64) -> ApiResult<()> {
    require_level(caller, role_level, &format!("grant role level {}", role_level))
}

/// GET /api/roles
pub async fn list_roles(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(roles::find_all(&state.db).await?))
}

/// POST /api/roles
pub async fn create_role(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewRole>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_level(&caller, level::ADMIN, "manage roles")?;
    let role = payload.normalized()?;
    ensure_grantable(&caller, role.level)?;

    let mut tx = state.db.begin().await?;
    if roles::name_taken(&mut *tx, &role.name, None).await? {
        return Err(ApiError::Conflict(format!(
            "Role '{}' already exists",
            role.name
        )));
    }
    let id = roles::insert(&mut *tx, &role).await?;
    let created = roles::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!("Role '{}' (level {}) created by {}", created.name, created.level, caller.username);
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Role created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/roles/:id
pub async fn get_role(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Role>> {
    let role = roles::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(role))
}

/// PUT /api/roles/:id
pub async fn update_role(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<RoleChanges>,
) -> ApiResult<Json<Updated<Role>>> {
    require_level(&caller, level::ADMIN, "manage roles")?;

    let mut tx = state.db.begin().await?;
    let before = roles::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    ensure_grantable(&caller, before.level)?;

    let mut role = before.clone();
    role.apply_changes(changes)?;
    if before.name == SUPERUSER_ROLE && (role.name != before.name || role.level != before.level) {
        return Err(ApiError::BadRequest(
            "The superuser role cannot be renamed or re-levelled".to_string(),
        ));
    }
    ensure_grantable(&caller, role.level)?;
    if roles::name_taken(&mut *tx, &role.name, Some(id)).await? {
        return Err(ApiError::Conflict(format!(
            "Role '{}' already exists",
            role.name
        )));
    }

    if !roles::update(&mut *tx, &role).await? {
        return Err(not_found());
    }
    let after = roles::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Role updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/roles/:id
pub async fn delete_role(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::ADMIN, "manage roles")?;

    let mut tx = state.db.begin().await?;
    let role = roles::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    if role.name == SUPERUSER_ROLE {
        return Err(ApiError::BadRequest(
            "The superuser role cannot be deleted".to_string(),
        ));
    }
    ensure_grantable(&caller, role.level)?;
    if role.user_count > 0 {
        return Err(ApiError::Conflict(format!(
            "Role '{}' is still assigned to {} user(s)",
            role.name, role.user_count
        )));
    }

    roles::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &role)).await?;
    tx.commit().await?;

    info!("Role '{}' deleted by {}", role.name, caller.username);
    Ok(Json(Message::new("Role deleted successfully")))
}

/// Build role routes
pub fn role_routes() -> Router<AppState> {
    Router::new()
        .route("/api/roles", get(list_roles).post(create_role))
        .route("/api/roles/:id", get(get_role).put(update_role).delete(delete_role))
}
