//! Evidence pack download

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    routing::post,
    Json, Router,
};
use qms_common::auth::level;
use tracing::{info, warn};

use super::auth::{require_level, AuthUser};
use crate::services::audit_log::{self, AuditEvent};
use crate::services::evidence_pack::{self, EvidencePackRequest};
use crate::{ApiError, ApiResult, AppState};

const ENTITY: &str = "evidence_pack";

/// POST /api/evidence-pack/generate
///
/// Streams the rendered document as an attachment. Both outcomes are
/// written to the audit trail.
pub async fn generate_evidence_pack(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    payload: Option<Json<EvidencePackRequest>>,
) -> ApiResult<Response> {
    require_level(&caller, level::AUDITOR, "generate evidence packs")?;
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let period = request.period()?;

    let rendered = match evidence_pack::collect(&state.db, &request, period, &caller.username).await {
        Ok(pack) => state
            .renderer
            .render(&pack)
            .map(|bytes| (bytes, pack.period_label(), pack.record_count())),
        Err(e) => Err(e),
    };

    let (bytes, period_label, records) = match rendered {
        Ok(output) => output,
        Err(e) => {
            warn!("Evidence pack generation failed for {}: {}", caller.username, e);
            let event = AuditEvent::action("generate_failed", ENTITY, None).with_details(e.to_string());
            if let Err(log_err) = audit_log::record(&state.db, &caller, event).await {
                warn!("Failed to record evidence pack failure: {}", log_err);
            }
            return Err(e.into());
        }
    };

    audit_log::record(
        &state.db,
        &caller,
        AuditEvent::action("generate", ENTITY, None).with_details(format!(
            "{}; {} records; {} bytes",
            period_label,
            records,
            bytes.len()
        )),
    )
    .await?;

    let file_name = format!(
        "QMS_Evidence_Pack_{}.{}",
        qms_common::time::today().format("%Y-%m-%d"),
        state.renderer.file_extension()
    );
    info!("Evidence pack {} generated for {} ({} records)", file_name, caller.username, records);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, state.renderer.content_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e)))
}

/// Build evidence pack routes
pub fn evidence_pack_routes() -> Router<AppState> {
    Router::new().route("/api/evidence-pack/generate", post(generate_evidence_pack))
}
