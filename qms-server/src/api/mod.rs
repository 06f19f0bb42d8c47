//! HTTP API handlers

pub mod audit_logs;
pub mod audits;
pub mod auth;
pub mod backups;
pub mod capas;
pub mod departments;
pub mod email_templates;
pub mod evidence_pack;
pub mod findings;
pub mod health;
pub mod ideas;
pub mod import_logs;
pub mod ncrs;
pub mod params;
pub mod processes;
pub mod roles;
pub mod skill_levels;
pub mod tasks;
pub mod users;

pub use auth::{auth_middleware, AuthUser};
pub use health::health_routes;

use qms_common::workflow::{self, Workflow};
use serde::{Deserialize, Serialize};

use crate::{ApiError, ApiResult};

/// `201` body for create endpoints
#[derive(Debug, Serialize)]
pub struct Created {
    pub message: String,
    pub id: i64,
}

/// Body for update and transition endpoints
#[derive(Debug, Serialize)]
pub struct Updated<T> {
    pub message: String,
    pub data: T,
}

/// Single workflow record plus the actions its current status accepts
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithActions<T> {
    #[serde(flatten)]
    pub record: T,
    pub allowed_actions: Vec<String>,
}

impl<T> WithActions<T> {
    pub fn new<W: Workflow>(record: T, status: W) -> Self {
        let allowed_actions = workflow::allowed_actions(status)
            .iter()
            .map(ToString::to_string)
            .collect();
        Self {
            record,
            allowed_actions,
        }
    }
}

/// Body for delete and other acknowledgement-only endpoints
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Body of `POST /<entity>/:id/status`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub action: String,
    pub comments: Option<String>,
}

impl TransitionRequest {
    /// Trimmed comments, `None` when blank
    pub fn comments(&self) -> Option<String> {
        self.comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }
}

/// Check the outcome of a status-guarded `UPDATE`
///
/// A lost race shows up as zero affected rows, or as SQLite refusing the
/// write because another transaction committed after this one read the row.
/// Both become `409 "<entity> was modified concurrently"`.
pub fn guarded_update(result: qms_common::Result<bool>, entity: &str) -> ApiResult<()> {
    match result {
        Ok(true) => Ok(()),
        Ok(false) => Err(modified_concurrently(entity)),
        Err(e) if e.is_write_conflict() => Err(modified_concurrently(entity)),
        Err(e) => Err(e.into()),
    }
}

fn modified_concurrently(entity: &str) -> ApiError {
    ApiError::Conflict(format!("{} was modified concurrently", entity))
}
