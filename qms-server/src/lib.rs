//! qms-server library - Quality management HTTP/JSON backend
//!
//! Audits, findings, NCRs, CAPAs, improvement ideas and their tasks, plus
//! the reference data and administration endpoints around them.

use axum::Router;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod services;

pub use error::{ApiError, ApiResult};

use services::evidence_pack::EvidencePackRenderer;
use services::pdf::PdfRenderer;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Directory holding `VACUUM INTO` backups
    pub backup_dir: PathBuf,
    /// Evidence pack output format
    pub renderer: Arc<dyn EvidencePackRenderer>,
}

impl AppState {
    /// Create new application state with the built-in PDF renderer
    pub fn new(db: SqlitePool, backup_dir: PathBuf) -> Self {
        Self {
            db,
            backup_dir,
            renderer: Arc::new(PdfRenderer::default()),
        }
    }

    /// Replace the evidence pack renderer
    pub fn with_renderer(mut self, renderer: Arc<dyn EvidencePackRenderer>) -> Self {
        self.renderer = renderer;
        self
    }
}

/// Build application router
///
/// Everything under `/api` requires a bearer token; `/health` does not.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    // Protected routes (require authentication)
    let protected = Router::new()
        .merge(api::ideas::idea_routes())
        .merge(api::tasks::task_routes())
        .merge(api::audits::audit_routes())
        .merge(api::findings::finding_routes())
        .merge(api::ncrs::ncr_routes())
        .merge(api::capas::capa_routes())
        .merge(api::departments::department_routes())
        .merge(api::processes::process_routes())
        .merge(api::roles::role_routes())
        .merge(api::users::user_routes())
        .merge(api::email_templates::email_template_routes())
        .merge(api::skill_levels::skill_level_routes())
        .merge(api::import_logs::import_log_routes())
        .merge(api::audit_logs::audit_log_routes())
        .merge(api::evidence_pack::evidence_pack_routes())
        .merge(api::backups::backup_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    // Public routes (no authentication)
    let public = Router::new().merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // The web frontend is served from its own origin
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
