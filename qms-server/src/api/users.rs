//! User endpoints
//!
//! Everything except `GET /api/users/me` is admin only. A user's plain API
//! token is returned exactly once, in the create response.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_level, AuthUser};
use super::params::ListParams;
use super::Updated;
use crate::db::roles;
use crate::db::users::{self, NewUser, User, UserFilter, UserSort};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "user";

fn not_found() -> ApiError {
    ApiError::NotFound("User not found".to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub message: String,
    pub id: i64,
    pub api_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(flatten)]
    pub user: User,
    pub level: i64,
}

#[derive(Debug, Deserialize)]
pub struct RolesRequest {
    pub roles: Vec<String>,
}

async fn ensure_roles_grantable(
    conn: &mut sqlx::SqliteConnection,
    caller: &qms_common::auth::Caller,
    role_names: &[String],
) -> ApiResult<()> {
    let highest = roles::max_level(&mut *conn, role_names).await?;
    require_level(caller, highest, &format!("grant role level {}", highest))
}

/// GET /api/users
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<User>>> {
    require_level(&caller, level::ADMIN, "list users")?;

    let params = ListParams::from(raw);
    let filter = UserFilter {
        search: params.text("search"),
        department_id: params.id("departmentId")?,
        include_inactive: params.flag("includeInactive")?,
    };
    let sort = params.sort(UserSort::Username, SortDirection::Asc)?;
    let page = params.page()?;

    Ok(Json(users::find_all(&state.db, &filter, &sort, page).await?))
}

/// GET /api/users/me
pub async fn current_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> ApiResult<Json<CurrentUser>> {
    let user = users::find_by_id(&state.db, caller.user_id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(CurrentUser {
        user,
        level: caller.level,
    }))
}

/// POST /api/users
pub async fn create_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(mut payload): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<UserCreated>)> {
    require_level(&caller, level::ADMIN, "create users")?;

    payload.username = payload.username.trim().to_string();
    payload.full_name = payload.full_name.trim().to_string();
    if payload.username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    if payload.full_name.is_empty() {
        return Err(ApiError::BadRequest("Full name is required".to_string()));
    }

    let mut tx = state.db.begin().await?;
    if users::username_exists(&mut *tx, &payload.username).await? {
        return Err(ApiError::Conflict(format!(
            "User '{}' already exists",
            payload.username
        )));
    }
    ensure_roles_grantable(&mut *tx, &caller, &payload.roles).await?;

    let (id, token) = users::insert(&mut *tx, &payload).await?;
    users::set_roles(&mut *tx, id, &payload.roles).await?;
    let created = users::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!(
        "User '{}' created by {} with roles {:?}",
        created.username, caller.username, created.roles
    );
    Ok((
        StatusCode::CREATED,
        Json(UserCreated {
            message: "User created successfully".to_string(),
            id,
            api_token: token,
        }),
    ))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<User>> {
    if id != caller.user_id {
        require_level(&caller, level::ADMIN, "view other users")?;
    }
    let user = users::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(user))
}

/// PUT /api/users/:id/roles
///
/// Replaces the full role set.
pub async fn assign_roles(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<RolesRequest>,
) -> ApiResult<Json<Updated<User>>> {
    require_level(&caller, level::ADMIN, "assign roles")?;

    let mut tx = state.db.begin().await?;
    let before = users::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    ensure_roles_grantable(&mut *tx, &caller, &before.roles).await?;
    ensure_roles_grantable(&mut *tx, &caller, &payload.roles).await?;

    users::set_roles(&mut *tx, id, &payload.roles).await?;
    let after = users::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(
        &mut *tx,
        &caller,
        AuditEvent::changed("assign_roles", ENTITY, id, &before, &after),
    )
    .await?;
    tx.commit().await?;

    info!(
        "Roles of '{}' set to {:?} by {}",
        after.username, after.roles, caller.username
    );
    Ok(Json(Updated {
        message: "User roles updated successfully".to_string(),
        data: after,
    }))
}

/// Build user routes
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/me", get(current_user))
        .route("/api/users/:id", get(get_user))
        .route("/api/users/:id/roles", put(assign_roles))
}
