//! Database initialization
//!
//! - Automatic database creation with the full QMS schema
//! - Idempotent: every statement is `IF NOT EXISTS` / `INSERT OR IGNORE`
//! - Default roles seeded on every start

use crate::auth::DEFAULT_ROLES;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Every QMS data table, parents before children
///
/// Used by backup restore to copy rows table by table.
pub const QMS_TABLES: &[&str] = &[
    "roles",
    "users",
    "user_roles",
    "departments",
    "processes",
    "improvement_ideas",
    "implementation_tasks",
    "audits",
    "ncrs",
    "audit_findings",
    "capas",
    "email_templates",
    "skill_levels",
    "data_import_logs",
    "audit_logs",
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        // WAL allows concurrent readers with one writer
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;
    seed_default_roles(&pool).await?;

    Ok(pool)
}

/// Create every QMS table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Insert the built-in roles if missing
pub async fn seed_default_roles(pool: &SqlitePool) -> Result<()> {
    let now = crate::time::now();
    for &(name, level, description) in DEFAULT_ROLES {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO roles (name, description, level, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(level)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
    }
    Ok(())
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        level INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT,
        full_name TEXT NOT NULL,
        department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
        active INTEGER NOT NULL DEFAULT 1,
        api_token_hash TEXT UNIQUE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS departments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        manager_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        active INTEGER NOT NULL DEFAULT 1,
        created_by INTEGER REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
        owner_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        active INTEGER NOT NULL DEFAULT 1,
        created_by INTEGER REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS improvement_ideas (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        idea_number TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        category TEXT,
        expected_benefits TEXT,
        estimated_cost REAL,
        estimated_benefit REAL,
        department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
        submitted_by INTEGER NOT NULL REFERENCES users(id),
        responsible_user INTEGER REFERENCES users(id) ON DELETE SET NULL,
        status TEXT NOT NULL DEFAULT 'submitted',
        review_comments TEXT,
        reviewed_by INTEGER REFERENCES users(id),
        reviewed_date TEXT,
        implementation_notes TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS implementation_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        improvement_idea_id INTEGER NOT NULL REFERENCES improvement_ideas(id) ON DELETE CASCADE,
        task_name TEXT NOT NULL,
        description TEXT,
        assigned_to INTEGER REFERENCES users(id) ON DELETE SET NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        progress_percentage INTEGER NOT NULL DEFAULT 0
            CHECK (progress_percentage BETWEEN 0 AND 100),
        start_date TEXT,
        due_date TEXT,
        completed_date TEXT,
        completion_evidence TEXT,
        created_by INTEGER NOT NULL REFERENCES users(id),
        updated_by INTEGER REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        audit_number TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        audit_type TEXT NOT NULL,
        scope TEXT,
        department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
        lead_auditor_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        scheduled_date TEXT NOT NULL,
        actual_start_date TEXT,
        actual_end_date TEXT,
        status TEXT NOT NULL DEFAULT 'planned',
        created_by INTEGER NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ncrs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ncr_number TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL,
        severity TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'open',
        department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
        assigned_to INTEGER REFERENCES users(id) ON DELETE SET NULL,
        root_cause TEXT,
        containment_action TEXT,
        detected_date TEXT NOT NULL,
        closed_date TEXT,
        created_by INTEGER NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_findings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        audit_id INTEGER NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        severity TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'open',
        clause_reference TEXT,
        evidence TEXT,
        requires_ncr INTEGER NOT NULL DEFAULT 0,
        ncr_id INTEGER REFERENCES ncrs(id) ON DELETE SET NULL,
        assigned_to INTEGER REFERENCES users(id) ON DELETE SET NULL,
        due_date TEXT,
        created_by INTEGER NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS capas (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        capa_number TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        capa_type TEXT NOT NULL,
        ncr_id INTEGER REFERENCES ncrs(id) ON DELETE SET NULL,
        priority TEXT NOT NULL DEFAULT 'medium',
        status TEXT NOT NULL DEFAULT 'open',
        root_cause TEXT,
        action_plan TEXT,
        responsible_user INTEGER REFERENCES users(id) ON DELETE SET NULL,
        target_date TEXT,
        completed_date TEXT,
        verified_by INTEGER REFERENCES users(id),
        verified_date TEXT,
        effectiveness_notes TEXT,
        created_by INTEGER NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        description TEXT,
        category TEXT,
        active INTEGER NOT NULL DEFAULT 1,
        created_by INTEGER REFERENCES users(id),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS skill_levels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        level INTEGER NOT NULL UNIQUE CHECK (level >= 1),
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS data_import_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        file_name TEXT NOT NULL,
        total_rows INTEGER NOT NULL,
        success_rows INTEGER NOT NULL,
        failed_rows INTEGER NOT NULL,
        status TEXT NOT NULL,
        errors TEXT NOT NULL DEFAULT '[]',
        imported_by INTEGER NOT NULL REFERENCES users(id),
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
        action TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id INTEGER,
        old_values TEXT,
        new_values TEXT,
        details TEXT,
        created_at TEXT NOT NULL
    )
    "#,
];
