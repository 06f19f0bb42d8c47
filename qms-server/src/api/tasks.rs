//! Implementation task endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use qms_common::query::{Page, SortDirection};
use qms_common::status::{TaskAction, TaskStatus};
use qms_common::workflow;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_writer, AuthUser};
use super::params::ListParams;
use super::{guarded_update, Created, Message, Updated, WithActions};
use crate::db::ideas;
use crate::db::tasks::{
    self, ImplementationTask, NewTask, TaskChanges, TaskFilter, TaskSort, TaskStatistics,
};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "implementation_task";

fn not_found() -> ApiError {
    ApiError::NotFound("Implementation task not found".to_string())
}

fn idea_not_found() -> ApiError {
    ApiError::NotFound("Improvement idea not found".to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub completion_evidence: Option<String>,
}

/// GET /api/implementation-tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<ImplementationTask>>> {
    let params = ListParams::from(raw);
    let page = params.page()?;
    let filter = TaskFilter {
        improvement_idea_id: params.id("improvementIdeaId")?,
        status: params.parsed("status")?,
        assigned_to: params.id("assignedTo")?,
    };
    let sort = params.sort(TaskSort::CreatedAt, SortDirection::Desc)?;

    Ok(Json(tasks::find_all(&state.db, &filter, &sort, page).await?))
}

/// GET /api/implementation-tasks/statistics/:improvementIdeaId
pub async fn task_statistics(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(improvement_idea_id): Path<i64>,
) -> ApiResult<Json<TaskStatistics>> {
    ideas::find_by_id(&state.db, improvement_idea_id)
        .await?
        .ok_or_else(idea_not_found)?;
    Ok(Json(tasks::statistics(&state.db, improvement_idea_id).await?))
}

/// POST /api/implementation-tasks
///
/// 404 when the parent idea does not exist.
pub async fn create_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_writer(&caller)?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    ideas::find_by_id(&mut *tx, payload.improvement_idea_id)
        .await?
        .ok_or_else(idea_not_found)?;

    let id = tasks::insert(&mut *tx, &payload, caller.user_id).await?;
    let created = tasks::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::created(ENTITY, id, &created)).await?;
    tx.commit().await?;

    info!(
        "Task {} created for improvement idea {}",
        id, payload.improvement_idea_id
    );
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Implementation task created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/implementation-tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<WithActions<ImplementationTask>>> {
    let task = tasks::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    let status = task.status;
    Ok(Json(WithActions::new(task, status)))
}

/// PUT /api/implementation-tasks/:id
///
/// Completed tasks are frozen and `completed` can only be reached through
/// the complete action.
pub async fn update_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    Json(changes): Json<TaskChanges>,
) -> ApiResult<Json<Updated<ImplementationTask>>> {
    require_writer(&caller)?;

    let mut tx = state.db.begin().await?;
    let before = tasks::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    if before.status == TaskStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "Cannot update task with status '{}'",
            before.status
        )));
    }

    let mut task = before.clone();
    task.apply_changes(changes)?;
    task.updated_by = Some(caller.user_id);

    guarded_update(
        tasks::update(&mut *tx, &task, Some(before.status)).await,
        "Implementation task",
    )?;

    let after = tasks::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(&mut *tx, &caller, AuditEvent::updated(ENTITY, id, &before, &after)).await?;
    tx.commit().await?;

    Ok(Json(Updated {
        message: "Implementation task updated successfully".to_string(),
        data: after,
    }))
}

/// DELETE /api/implementation-tasks/:id
pub async fn delete_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Message>> {
    require_writer(&caller)?;

    let mut tx = state.db.begin().await?;
    let task = tasks::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    tasks::delete(&mut *tx, id).await?;
    audit_log::record(&mut *tx, &caller, AuditEvent::deleted(ENTITY, id, &task)).await?;
    tx.commit().await?;

    Ok(Json(Message::new("Implementation task deleted successfully")))
}

/// POST /api/implementation-tasks/:id/complete
pub async fn complete_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<i64>,
    payload: Option<Json<CompleteRequest>>,
) -> ApiResult<Json<Updated<ImplementationTask>>> {
    require_writer(&caller)?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    let mut tx = state.db.begin().await?;
    let before = tasks::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    if before.status == TaskStatus::Completed {
        return Err(ApiError::BadRequest("Task is already completed".to_string()));
    }

    let mut task = before.clone();
    task.status = workflow::apply(before.status, TaskAction::Complete)?;
    task.progress_percentage = 100;
    task.completed_date = Some(qms_common::time::now());
    task.completion_evidence = payload.completion_evidence;
    task.updated_by = Some(caller.user_id);

    guarded_update(
        tasks::update(&mut *tx, &task, Some(before.status)).await,
        "Implementation task",
    )?;

    let after = tasks::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(
        &mut *tx,
        &caller,
        AuditEvent::changed("complete", ENTITY, id, &before, &after),
    )
    .await?;
    tx.commit().await?;

    info!("Task {} completed by {}", id, caller.username);
    Ok(Json(Updated {
        message: "Task completed successfully".to_string(),
        data: after,
    }))
}

/// Build implementation task routes
pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/api/implementation-tasks", get(list_tasks).post(create_task))
        .route(
            "/api/implementation-tasks/statistics/:improvement_idea_id",
            get(task_statistics),
        )
        .route(
            "/api/implementation-tasks/:id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/implementation-tasks/:id/complete", post(complete_task))
}
