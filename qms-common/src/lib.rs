//! # QMS Common Library
//!
//! Shared code for the QMS backend:
//! - Error type
//! - Configuration loading and root folder resolution
//! - Database schema, migrations and seeding
//! - Status enums and their transition tables
//! - List-query parsing (pagination, sorting, date ranges)
//! - API token hashing and the authenticated caller

pub mod status;

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod query;
pub mod time;
pub mod workflow;

pub use error::{Error, Result};
