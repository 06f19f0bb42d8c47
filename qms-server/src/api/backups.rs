//! Backup administration endpoints (admin only)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use qms_common::auth::level;
use serde::Serialize;
use tracing::{info, warn};

use super::auth::{require_level, AuthUser};
use super::{Message, Updated};
use crate::services::audit_log::{self, AuditEvent};
use crate::services::backup::{self, BackupInfo};
use crate::{ApiResult, AppState};

const ENTITY: &str = "backup";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub file_name: String,
    pub rows_restored: usize,
}

/// GET /api/system/backups
pub async fn list_backups(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> ApiResult<Json<Vec<BackupInfo>>> {
    require_level(&caller, level::ADMIN, "manage backups")?;
    Ok(Json(backup::list(&state.backup_dir).await?))
}

/// POST /api/system/backups
pub async fn create_backup(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> ApiResult<(StatusCode, Json<Updated<BackupInfo>>)> {
    require_level(&caller, level::ADMIN, "manage backups")?;

    let created = backup::create(&state.db, &state.backup_dir).await?;
    audit_log::record(
        &state.db,
        &caller,
        AuditEvent::action("create", ENTITY, None).with_details(created.file_name.clone()),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(Updated {
            message: "Backup created successfully".to_string(),
            data: created,
        }),
    ))
}

/// POST /api/system/backups/:fileName/restore
///
/// The audit entry is written after the restore so it is not overwritten.
pub async fn restore_backup(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(file_name): Path<String>,
) -> ApiResult<Json<Updated<RestoreSummary>>> {
    require_level(&caller, level::ADMIN, "manage backups")?;

    let rows_restored = backup::restore(&state.db, &state.backup_dir, &file_name).await?;
    let event = AuditEvent::action("restore", ENTITY, None)
        .with_details(format!("{} ({} rows)", file_name, rows_restored));
    // The caller's own user row may not exist in the restored data
    if let Err(e) = audit_log::record(&state.db, &caller, event).await {
        warn!("Could not record restore of {}: {}", file_name, e);
    }

    info!("Backup {} restored by {}", file_name, caller.username);
    Ok(Json(Updated {
        message: "Backup restored successfully".to_string(),
        data: RestoreSummary {
            file_name,
            rows_restored,
        },
    }))
}

/// DELETE /api/system/backups/:fileName
pub async fn delete_backup(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(file_name): Path<String>,
) -> ApiResult<Json<Message>> {
    require_level(&caller, level::ADMIN, "manage backups")?;

    backup::delete(&state.backup_dir, &file_name).await?;
    audit_log::record(
        &state.db,
        &caller,
        AuditEvent::action("delete", ENTITY, None).with_details(file_name.clone()),
    )
    .await?;

    Ok(Json(Message::new("Backup deleted successfully")))
}

/// Build backup routes
pub fn backup_routes() -> Router<AppState> {
    Router::new()
        .route("/api/system/backups", get(list_backups).post(create_backup))
        .route("/api/system/backups/:file_name", delete(delete_backup))
        .route("/api/system/backups/:file_name/restore", post(restore_backup))
}
