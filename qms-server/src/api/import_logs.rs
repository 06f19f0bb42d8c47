//! Data import log endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use qms_common::query::{Page, SortDirection};
use std::collections::HashMap;
use tracing::info;

use super::auth::{require_writer, AuthUser};
use super::params::ListParams;
use super::Created;
use crate::db::import_logs::{self, DataImportLog, ImportLogFilter, ImportLogSort, NewImportLog};
use crate::services::audit_log::{self, AuditEvent};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "data_import_log";

fn not_found() -> ApiError {
    ApiError::NotFound("Data import log not found".to_string())
}

/// GET /api/data-import-logs
pub async fn list_import_logs(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<DataImportLog>>> {
    let params = ListParams::from(raw);
    let filter = ImportLogFilter {
        entity_type: params.text("entityType"),
        status: params.parsed("status")?,
    };
    let sort = params.sort(ImportLogSort::CreatedAt, SortDirection::Desc)?;
    let page = params.page()?;

    Ok(Json(import_logs::find_all(&state.db, &filter, &sort, page).await?))
}

/// POST /api/data-import-logs
///
/// The status is derived from the row counts, never taken from the body.
pub async fn create_import_log(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<NewImportLog>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    require_writer(&caller)?;
    payload.validate()?;

    let mut tx = state.db.begin().await?;
    let id = import_logs::insert(&mut *tx, &payload, caller.user_id).await?;
    let created = import_logs::find_by_id(&mut *tx, id).await?.ok_or_else(not_found)?;
    audit_log::record(
        &mut *tx,
        &caller,
        AuditEvent::action("import", ENTITY, Some(id)).with_details(format!(
            "{} from {}: {}/{} rows imported ({})",
            created.entity_type,
            created.file_name,
            created.success_rows,
            created.total_rows,
            created.status
        )),
    )
    .await?;
    tx.commit().await?;

    info!(
        "Import of {} recorded by {}: {}",
        created.file_name, caller.username, created.status
    );
    Ok((
        StatusCode::CREATED,
        Json(Created {
            message: "Data import log created successfully".to_string(),
            id,
        }),
    ))
}

/// GET /api/data-import-logs/:id
pub async fn get_import_log(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<DataImportLog>> {
    let log = import_logs::find_by_id(&state.db, id).await?.ok_or_else(not_found)?;
    Ok(Json(log))
}

/// Build data import log routes
pub fn import_log_routes() -> Router<AppState> {
    Router::new()
        .route("/api/data-import-logs", get(list_import_logs).post(create_import_log))
        .route("/api/data-import-logs/:id", get(get_import_log))
}
