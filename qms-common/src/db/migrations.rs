//! Database schema migrations
//!
//! Versioned, idempotent schema changes applied after the baseline
//! `CREATE TABLE IF NOT EXISTS` statements in `init.rs`.
//!
//! # Migration Guidelines
//!
//! 1. Never modify existing migrations; add a new one per schema change
//! 2. Every migration must be safe to run twice
//! 3. Prefer `ALTER TABLE ... ADD COLUMN` over DROP/CREATE to keep data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Get current schema version from database (0 when none recorded)
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(version)
        .bind(crate::time::now())
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes for list filters and foreign keys
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    const INDEXES: &[&str] = &[
        "CREATE INDEX IF NOT EXISTS idx_ideas_status ON improvement_ideas(status)",
        "CREATE INDEX IF NOT EXISTS idx_tasks_idea ON implementation_tasks(improvement_idea_id)",
        "CREATE INDEX IF NOT EXISTS idx_audits_status ON audits(status)",
        "CREATE INDEX IF NOT EXISTS idx_findings_audit ON audit_findings(audit_id)",
        "CREATE INDEX IF NOT EXISTS idx_ncrs_status ON ncrs(status)",
        "CREATE INDEX IF NOT EXISTS idx_capas_status ON capas(status)",
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_entity ON audit_logs(entity_type, entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_created ON audit_logs(created_at)",
    ];

    for statement in INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Migration v2: link NCRs to the process they were raised against
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('ncrs') WHERE name = 'process_id'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  ncrs.process_id already exists - skipping");
        return Ok(());
    }

    sqlx::query(
        "ALTER TABLE ncrs ADD COLUMN process_id INTEGER REFERENCES processes(id) ON DELETE SET NULL",
    )
    .execute(pool)
    .await?;

    info!("  Added process_id column to ncrs table");
    Ok(())
}
