//! Improvement idea endpoints
//!
//! Ideas move through `submitted → under_review → approved | rejected →
//! in_progress → implemented → closed`. Approve and reject have their own
//! routes; every other action goes through `POST /:id/status`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use qms_common::status::{IdeaAction, IdeaStatus};
use qms_common::workflow;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_level, require_writer, AuthUser};
use super::params::ListParams;
use super::{guarded_update, Created, Message, Updated, WithActions};
use crate::db::ideas::{self, IdeaChanges, IdeaFilter, IdeaSort, IdeaStatistics, ImprovementIdea, NewIdea};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "improvement_idea";

fn not_found() -> ApiError {
    ApiError::NotFound("Improvement idea not found".to_string())
}

/// Optional fields accepted by the approve endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub review_comments: Option<String>,
    pub responsible_user: Option<i64>,
    pub implementation_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub review_comments: Option<String>,
}

/// Body of `POST /:id/status`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub action: String,
    pub comments: Option<String>,
    pub responsible_user: Option<i64>,
    pub implementation_notes: Option<String>,
}

/// Inputs that an action may copy onto the idea
#[derive(Debug, Default)]
struct ActionInput {
    comments: Option<String>,
    responsible_user: Option<i64>,
    implementation_notes: Option<String>,
}

/// GET /api/improvement-ideas
pub async fn list_ideas(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<ImprovementIdea>>> {
    let params = ListParams::from(raw);
    let filter = IdeaFilter {
        status: params.parsed("status")?,
        category: params.text("category"),
        department_id: params.id("departmentId")?,
        submitted_by: params.id("submittedBy")?,
        search: params.text("search"),
        created: params.date_range()?,
    };
    let sort = params.sort(IdeaSort::CreatedAt, SortDirection::Desc)?;
    let page = params.page()?;

    Ok(Json(ideas::find_all(&state.db, &filter, &sort, page).await?))
}

/// GET /api/improvement-ideas/statistics
pub async fn idea_statistics(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
) -> ApiResult<Json<IdeaStatistics>> {
    Ok(Json(ideas::statistics(&state.db).await?))
}

/// POST /api/improvement-ideas
pub async fn create_idea(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewIdea>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_writer(&caller)?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    let id = ideas::insert(&mut *tx, &payload, caller.user_id).await?;
    let created = ideas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!("Improvement idea {} submitted by {}", created.idea_number, caller.username);
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Improvement idea created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/improvement-ideas/:id
pub async fn get_idea(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<WithActions<ImprovementIdea>>> {
    let idea = ideas::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    let status = idea.status;
    Ok(Json(WithActions::new(idea, status)))
}

/// PUT /api/improvement-ideas/:id
///
/// Allowed for the submitter and for managers; closed ideas are frozen.
pub async fn update_idea(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<IdeaChanges>,
) -> ApiResult<Json<Updated<ImprovementIdea>>> {
    require_writer(&caller)?;

    let mut tx = state.db.begin().await?;
    let before = ideas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;

    if before.submitted_by != caller.user_id && !caller.has_level(level::MANAGER) {
        return Err(ApiError::Forbidden(
            "Only the submitter or a manager can update this idea".to_string(),
        ));
    }
    if before.status == IdeaStatus::Closed {
        return Err(ApiError::BadRequest(format!(
            "Cannot update idea with status '{}'",
            before.status
        )));
    }

    let mut idea = before.clone();
    idea.apply_changes(changes)?;
    guarded_update(
        ideas::update(&mut *tx, &idea, Some(before.status)).await,
        "Improvement idea",
    )?;

    let after = ideas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Improvement idea updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/improvement-ideas/:id
///
/// The submitter may withdraw an idea while it is still `submitted`;
/// admins may delete any idea. Tasks are removed with it.
pub async fn delete_idea(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_writer(&caller)?;

    let mut tx = state.db.begin().await?;
    let idea = ideas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;

    let own_draft = idea.submitted_by == caller.user_id && idea.status == IdeaStatus::Submitted;
    if !own_draft && !caller.is_admin() {
        return Err(ApiError::Forbidden(
            "Only the submitter can delete an idea while it is submitted".to_string(),
        ));
    }

    ideas::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &idea)).await?;
    tx.commit().await?;

    info!("Improvement idea {} deleted by {}", idea.idea_number, caller.username);
    Ok(Json(Message::new("Improvement idea deleted successfully")))
}

/// POST /api/improvement-ideas/:id/approve
pub async fn approve_idea(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    payload: Option<Json<ApproveRequest>>,
) -> ApiResult<Json<Updated<ImprovementIdea>>> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let input = ActionInput {
        comments: payload.review_comments,
        responsible_user: payload.responsible_user,
        implementation_notes: payload.implementation_notes,
    };
    perform_action(&state, &caller, id, IdeaAction::Approve, input).await
}

/// POST /api/improvement-ideas/:id/reject
///
/// `reviewComments` is mandatory.
pub async fn reject_idea(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    payload: Option<Json<RejectRequest>>,
) -> ApiResult<Json<Updated<ImprovementIdea>>> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let input = ActionInput {
        comments: payload.review_comments,
        ..Default::default()
    };
    perform_action(&state, &caller, id, IdeaAction::Reject, input).await
}

/// POST /api/improvement-ideas/:id/status
pub async fn change_idea_status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(payload): Json<StatusRequest>,
) -> ApiResult<Json<Updated<ImprovementIdea>>> {
    let action: IdeaAction = payload.action.trim().parse()?;
    let input = ActionInput {
        comments: payload.comments,
        responsible_user: payload.responsible_user,
        implementation_notes: payload.implementation_notes,
    };
    perform_action(&state, &caller, id, action, input).await
}

async fn perform_action(
    state: &AppState,
    caller: &qms_common::auth::Caller,
    id: i64,
    action: IdeaAction,
    input: ActionInput,
) -> ApiResult<Json<Updated<ImprovementIdea>>> {
    match action {
        IdeaAction::Review | IdeaAction::Approve | IdeaAction::Reject => {
            require_level(caller, level::MANAGER, "review improvement ideas")?
        }
        _ => require_writer(caller)?,
    }

    let comments = input
        .comments
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    if action == IdeaAction::Reject && comments.is_none() {
        return Err(ApiError::BadRequest(
            "Review comments are required when rejecting an idea".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;
    let before = ideas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    let next = workflow::apply(before.status, action)?;

    let mut idea = before.clone();
    idea.status = next;
    match action {
        IdeaAction::Approve | IdeaAction::Reject => {
            idea.reviewed_by = Some(caller.user_id);
            idea.reviewed_date = Some(qms_common::time::now());
            if comments.is_some() {
                idea.review_comments = comments;
            }
            if action == IdeaAction::Approve {
                if input.responsible_user.is_some() {
                    idea.responsible_user = input.responsible_user;
                }
                if input.implementation_notes.is_some() {
                    idea.implementation_notes = input.implementation_notes;
                }
            }
        }
        _ => {
            if input.implementation_notes.is_some() {
                idea.implementation_notes = input.implementation_notes;
            }
        }
    }

    guarded_update(
        ideas::update(&mut *tx, &idea, Some(before.status)).await,
        "Improvement idea",
    )?;

    let after = ideas::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(
        &mut *tx,
        caller,
        AuditEvent::changed(action.as_str(), ENTITY, id, &before, &after),
    )
    .await?;
    tx.commit().await?;

    info!(
        "Improvement idea {} {} -> {} by {}",
        after.idea_number, before.status, after.status, caller.username
    );

    let message = match action {
        IdeaAction::Approve => "Improvement idea approved successfully".to_string(),
        IdeaAction::Reject => "Improvement idea rejected successfully".to_string(),
        _ => format!("Improvement idea status updated to '{}'", after.status),
    };
    Ok(Json(Updated {
        message,
        data: after,
    }))
}

/// Build improvement idea routes
pub fn idea_routes() -> Router<AppState> {
    Router::new()
        .route("/api/improvement-ideas", get(list_ideas).post(create_idea))
        .route("/api/improvement-ideas/statistics", get(idea_statistics))
        .route(
            "/api/improvement-ideas/:id",
            get(get_idea).put(update_idea).delete(delete_idea),
        )
        .route("/api/improvement-ideas/:id/approve", post(approve_idea))
        .route("/api/improvement-ideas/:id/reject", post(reject_idea))
        .route("/api/improvement-ideas/:id/status", post(change_idea_status))
}
