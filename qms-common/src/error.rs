//! Common error types for the QMS backend

use thiserror::Error;

/// Common result type for QMS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the QMS crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of stored values failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Uniqueness or concurrent-modification conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// SQLite `BUSY` and `BUSY_SNAPSHOT`
///
/// `BUSY_SNAPSHOT` is raised when a transaction that has already read tries
/// to write after another connection committed, so its snapshot is stale.
const SQLITE_BUSY_CODES: &[&str] = &["5", "517"];

/// True when `err` is SQLite refusing a write because another connection
/// got there first
pub fn is_write_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| SQLITE_BUSY_CODES.contains(&&*code)),
        _ => false,
    }
}

impl Error {
    /// See [`is_write_conflict`]
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Error::Database(e) if is_write_conflict(e))
    }
}
