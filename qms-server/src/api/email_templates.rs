//! Email template endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_level, AuthUser};
use super::params::ListParams;
use super::{Created, Message, Updated};
use crate::db::email_templates::{
    self, EmailTemplate, EmailTemplateChanges, EmailTemplateFilter, EmailTemplateSort,
    NewEmailTemplate,
};
use crate::services::audit_log::{self, AuditEvent};
use crate::services::templating::{self, RenderedEmail};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "email_template";

fn not_found() -> ApiError {
    ApiError::NotFound("Email template not found".to_string())
}

fn duplicate(name: &str) -> ApiError {
    ApiError::Conflict(format!("Email template '{}' already exists", name))
}

#[derive(Debug, Default, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub variables: serde_json::Value,
}

/// GET /api/email-templates
pub async fn list_templates(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<EmailTemplate>>> {
    let params = ListParams::from(raw);
    let filter = EmailTemplateFilter {
        category: params.text("category"),
        include_inactive: params.flag("includeInactive")?,
        search: params.text("search"),
    };
    let sort = params.sort(EmailTemplateSort::Name, SortDirection::Asc)?;
    let page = params.page()?;

    Ok(Json(email_templates::find_all(&state.db, &filter, &sort, page).await?))
}

/// POST /api/email-templates
pub async fn create_template(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewEmailTemplate>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_level(&caller, level::MANAGER, "manage email templates")?;
    payload.validate()?;
    templating::check_syntax(&payload.subject, &payload.body)?;

    let mut tx = state.db.begin().await?;
    if email_templates::name_taken(&mut *tx, payload.name.trim(), None).await? {
        return Err(duplicate(payload.name.trim()));
    }
    let id = email_templates::insert(&mut *tx, &payload, caller.user_id).await?;
    let created = email_templates::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!("Email template '{}' created by {}", created.name, caller.username);
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Email template created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/email-templates/:id
pub async fn get_template(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<EmailTemplate>> {
    let template = email_templates::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(template))
}

/// PUT /api/email-templates/:id
pub async fn update_template(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<EmailTemplateChanges>,
) -> ApiResult<Json<Updated<EmailTemplate>>> {
    require_level(&caller, level::MANAGER, "manage email templates")?;

    let mut tx = state.db.begin().await?;
    let before = email_templates::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let mut template = before.clone();
    template.apply_changes(changes)?;
    templating::check_syntax(&template.subject, &template.body)?;
    if email_templates::name_taken(&mut *tx, &template.name, Some(id)).await? {
        return Err(duplicate(&template.name));
    }

    if !email_templates::update(&mut *tx, &template).await? {
        return Err(not_found());
    }
    let after = email_templates::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Email template updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/email-templates/:id
pub async fn delete_template(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::MANAGER, "manage email templates")?;

    let mut tx = state.db.begin().await?;
    let template = email_templates::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    email_templates::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &template)).await?;
    tx.commit().await?;

    info!("Email template '{}' deleted by {}", template.name, caller.username);
    Ok(Json(Message::new("Email template deleted successfully")))
}

/// POST /api/email-templates/:id/render
///
/// Preview only; nothing is sent or stored.
pub async fn render_template(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
    payload: Option<Json<RenderRequest>>,
) -> ApiResult<Json<RenderedEmail>> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let template = email_templates::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(templating::render(&template, &request.variables)?))
}

/// Build email template routes
pub fn email_template_routes() -> Router<AppState> {
    Router::new()
        .route("/api/email-templates", get(list_templates).post(create_template))
        .route(
            "/api/email-templates/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/api/email-templates/:id/render", post(render_template))
}
