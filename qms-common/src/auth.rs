//! API token handling and the authenticated caller
//!
//! # Architecture
//!
//! - Callers send `Authorization: Bearer <token>`
//! - Tokens are 32 random bytes, hex encoded (64 characters)
//! - Only the SHA-256 of a token is stored (`users.api_token_hash`)
//! - The resolved identity travels as an immutable [`Caller`] value
//!
//! This module contains ONLY pure functions and types. The HTTP middleware
//! that uses them lives in qms-server.

use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Numeric role ranks used for coarse authorization checks
pub mod level {
    pub const SUPERUSER: i64 = 100;
    pub const ADMIN: i64 = 90;
    pub const MANAGER: i64 = 50;
    pub const AUDITOR: i64 = 30;
    pub const USER: i64 = 10;
    pub const VIEWER: i64 = 0;
}

/// Roles created on first database initialization
pub const DEFAULT_ROLES: &[(&str, i64, &str)] = &[
    ("superuser", level::SUPERUSER, "Unrestricted system access"),
    ("admin", level::ADMIN, "System administration"),
    ("manager", level::MANAGER, "Approves ideas and manages quality records"),
    ("auditor", level::AUDITOR, "Plans audits and records findings"),
    ("user", level::USER, "Creates and updates quality records"),
    ("viewer", level::VIEWER, "Read-only access"),
];

/// Name of the role that can never be removed
pub const SUPERUSER_ROLE: &str = "superuser";

/// Generate a new random API token
///
/// ```
/// let token = qms_common::auth::generate_token();
/// assert_eq!(token.len(), 64);
/// assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 of a token as 64 lowercase hex characters
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract the token from an `Authorization` header value
///
/// ```
/// use qms_common::auth::parse_bearer;
///
/// assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
/// assert_eq!(parse_bearer("bearer  abc "), Some("abc"));
/// assert_eq!(parse_bearer("Basic abc"), None);
/// assert_eq!(parse_bearer("Bearer "), None);
/// ```
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Authenticated identity attached to each request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub user_id: i64,
    pub username: String,
    pub roles: Vec<String>,
    /// Highest level among `roles`
    pub level: i64,
}

impl Caller {
    pub fn has_level(&self, required: i64) -> bool {
        self.level >= required
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_level(level::ADMIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_token("secret-token");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("secret-token"));
        assert_ne!(hash, hash_token("secret-token2"));
    }

    #[test]
    fn test_known_sha256_digest() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_generated_tokens_differ() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_caller_levels() {
        let caller = Caller {
            user_id: 7,
            username: "qa".to_string(),
            roles: vec!["manager".to_string()],
            level: level::MANAGER,
        };
        assert!(caller.has_level(level::USER));
        assert!(caller.has_level(level::MANAGER));
        assert!(!caller.is_admin());
        assert!(caller.has_role("manager"));
        assert!(!caller.has_role("admin"));
    }
}
