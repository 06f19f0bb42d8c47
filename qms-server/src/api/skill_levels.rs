//! Skill level endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use qms_common::auth::level;

use super::auth::{require_level, AuthUser};
use super::{Created, Message, Updated};
use crate::db::skill_levels::{self, NewSkillLevel, SkillLevel, SkillLevelChanges};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "skill_level";

fn not_found() -> ApiError {
    ApiError::NotFound("Skill level not found".to_string())
}

async fn check_unique(
    conn: &mut sqlx::SqliteConnection,
    skill_level: i64,
    name: &str,
    exclude_id: Option<i64>,
) -> ApiResult<()> {
    match skill_levels::find_duplicate(&mut *conn, skill_level, name, exclude_id).await? {
        Some("level") => Err(ApiError::Conflict(format!(
            "Skill level {} already exists",
            skill_level
        ))),
        Some(_) => Err(ApiError::Conflict(format!(
            "Skill level with name '{}' already exists",
            name
        ))),
        None => Ok(()),
    }
}

/// GET /api/skill-levels
pub async fn list_skill_levels(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
) -> ApiResult<Json<Vec<SkillLevel>>> {
    Ok(Json(skill_levels::find_all(&state.db).await?))
}

/// POST /api/skill-levels
pub async fn create_skill_level(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewSkillLevel>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_level(&caller, level::MANAGER, "manage skill levels")?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    check_unique(&mut *tx, payload.level, payload.name.trim(), None).await?;
    let id = skill_levels::insert(&mut *tx, &payload).await?;
    let created = skill_levels::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Skill level created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/skill-levels/:id
pub async fn get_skill_level(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<SkillLevel>> {
    let skill = skill_levels::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(skill))
}

/// PUT /api/skill-levels/:id
pub async fn update_skill_level(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<SkillLevelChanges>,
) -> ApiResult<Json<Updated<SkillLevel>>> {
    require_level(&caller, level::MANAGER, "manage skill levels")?;

    let mut tx = state.db.begin().await?;
    let before = skill_levels::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let mut skill = before.clone();
    skill.apply_changes(changes)?;
    check_unique(&mut *tx, skill.level, &skill.name, Some(id)).await?;

    if !skill_levels::update(&mut *tx, &skill).await? {
        return Err(not_found());
    }
    let after = skill_levels::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Skill level updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/skill-levels/:id
pub async fn delete_skill_level(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::MANAGER, "manage skill levels")?;

    let mut tx = state.db.begin().await?;
    let skill = skill_levels::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    skill_levels::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &skill)).await?;
    tx.commit().await?;

    Ok(Json(Message::new("Skill level deleted successfully")))
}

/// Build skill level routes
pub fn skill_level_routes() -> Router<AppState> {
    Router::new()
        .route("/api/skill-levels", get(list_skill_levels).post(create_skill_level))
        .route(
            "/api/skill-levels/:id",
            get(get_skill_level).put(update_skill_level).delete(delete_skill_level),
        )
}
