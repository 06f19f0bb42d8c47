//! Authentication middleware and caller extractor
//!
//! The middleware resolves `Authorization: Bearer <token>` to a [`Caller`]
//! and stores it in the request extensions. Handlers take [`AuthUser`] to
//! receive it.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use qms_common::auth::{hash_token, parse_bearer, Caller};
use tracing::{debug, warn};

use crate::db::users;
use crate::error::ApiError;
use crate::AppState;

/// Authentication middleware
///
/// Returns 401 when the header is missing, malformed, or names an unknown
/// or inactive user. Applied to `/api` routes only.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_bearer)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let caller = users::find_caller_by_token_hash(&state.db, &hash_token(token))
        .await?
        .ok_or_else(|| {
            warn!("Rejected request with unknown API token");
            ApiError::Unauthorized("Invalid API token".to_string())
        })?;

    debug!(user = %caller.username, level = caller.level, "Authenticated request");
    request.extensions_mut().insert(caller);

    Ok(next.run(request).await)
}

/// Authenticated caller, injected by [`auth_middleware`]
#[derive(Debug, Clone)]
pub struct AuthUser(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}

/// Reject callers below `required`
///
/// `action` completes the sentence "Insufficient permissions to ...".
pub fn require_level(caller: &Caller, required: i64, action: &str) -> Result<(), ApiError> {
    if caller.has_level(required) {
        Ok(())
    } else {
        warn!(
            user = %caller.username,
            level = caller.level,
            required,
            "Permission denied: {}",
            action
        );
        Err(ApiError::Forbidden(format!(
            "Insufficient permissions to {}",
            action
        )))
    }
}

/// Anyone above viewer may create and edit records
pub fn require_writer(caller: &Caller) -> Result<(), ApiError> {
    require_level(caller, qms_common::auth::level::USER, "modify records")
}

#[cfg(test)]
mod tests {
    use super::*;
    use qms_common::auth::level;

    fn caller(level: i64) -> Caller {
        Caller {
            user_id: 7,
            username: "tester".to_string(),
            roles: vec![],
            level,
        }
    }

    #[test]
    fn test_require_level() {
        assert!(require_level(&caller(level::MANAGER), level::MANAGER, "approve").is_ok());
        assert!(require_level(&caller(level::ADMIN), level::MANAGER, "approve").is_ok());

        match require_level(&caller(level::USER), level::MANAGER, "approve ideas") {
            Err(ApiError::Forbidden(msg)) => {
                assert_eq!(msg, "Insufficient permissions to approve ideas")
            }
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[test]
    fn test_viewer_is_not_writer() {
        assert!(require_writer(&caller(level::VIEWER)).is_err());
        assert!(require_writer(&caller(level::USER)).is_ok());
    }
}
