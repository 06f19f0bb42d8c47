//! Audit trail endpoint (admin only, read-only)

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use qms_common::auth::level;
use qms_common::query::{Page, SortDirection};
use std::collections::HashMap;

use super::auth::{require_level, AuthUser};
use super::params::ListParams;
use crate::db::audit_logs::{self, AuditLogEntry, AuditLogFilter, AuditLogSort};
use crate::{ApiResult, AppState};

/// GET /api/audit-logs
///
/// Filters: `entityType`, `entityId`, `userId`, `action`, `startDate`, `endDate`.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> ApiResult<Json<Page<AuditLogEntry>>> {
    require_level(&caller, level::ADMIN, "view the audit trail")?;

    let params = ListParams::from(raw);
    let filter = AuditLogFilter {
        entity_type: params.text("entityType"),
        entity_id: params.id("entityId")?,
        user_id: params.id("userId")?,
        action: params.text("action"),
        dates: params.date_range()?,
    };
    let sort = params.sort(AuditLogSort::CreatedAt, SortDirection::Desc)?;
    let page = params.page()?;

    Ok(Json(audit_logs::find_all(&state.db, &filter, &sort, page).await?))
}

/// Build audit trail routes
pub fn audit_log_routes() -> Router<AppState> {
    Router::new().route("/api/audit-logs", get(list_audit_logs))
}
