//! Audit trail storage

use chrono::{DateTime, Utc};
use qms_common::query::{DateRange, Page, PageRequest, Sort, SortField};
use qms_common::Result;
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Row to insert; `created_at` is assigned on insert
#[derive(Debug, Clone, Default)]
pub struct NewAuditLogEntry {
    pub user_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub details: Option<String>,
}

#[derive(Debug, Default)]
pub struct AuditLogFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub user_id: Option<i64>,
    pub action: Option<String>,
    pub dates: DateRange,
}

qms_common::string_enum! {
    pub enum AuditLogSort("sort field") {
        CreatedAt => "createdAt",
        Action => "action",
        EntityType => "entityType",
    }
}

impl SortField for AuditLogSort {
    fn column(&self) -> &'static str {
        match self {
            AuditLogSort::CreatedAt => "created_at",
            AuditLogSort::Action => "action",
            AuditLogSort::EntityType => "entity_type",
        }
    }
}

const SELECT_AUDIT_LOGS: &str = r#"
    SELECT id, user_id, action, entity_type, entity_id, old_values, new_values, details, created_at,
        (SELECT u.username FROM users u WHERE u.id = audit_logs.user_id) AS username
    FROM audit_logs
"#;

fn parse_json(raw: Option<String>) -> Result<Option<Value>> {
    Ok(raw.map(|text| serde_json::from_str(&text)).transpose()?)
}

impl AuditLogEntry {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            action: row.try_get("action")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            old_values: parse_json(row.try_get("old_values")?)?,
            new_values: parse_json(row.try_get("new_values")?)?,
            details: row.try_get("details")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub async fn insert<'e, E>(executor: E, entry: &NewAuditLogEntry) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = sqlx::query(
        r#"
        INSERT INTO audit_logs (user_id, action, entity_type, entity_id, old_values, new_values,
                                details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.user_id)
    .bind(&entry.action)
    .bind(&entry.entity_type)
    .bind(entry.entity_id)
    .bind(entry.old_values.as_ref().map(Value::to_string))
    .bind(entry.new_values.as_ref().map(Value::to_string))
    .bind(&entry.details)
    .bind(qms_common::time::now())
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &AuditLogFilter,
    sort: &Sort<AuditLogSort>,
    page: PageRequest,
) -> Result<Page<AuditLogEntry>> {
    super::fetch_page(
        pool,
        "audit_logs",
        SELECT_AUDIT_LOGS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        AuditLogEntry::from_row,
    )
    .await
}

/// Entries created within `dates`, oldest first
pub async fn find_in_range(pool: &SqlitePool, dates: &DateRange) -> Result<Vec<AuditLogEntry>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_AUDIT_LOGS);
    qb.push(" WHERE 1=1");
    super::push_date_range(&mut qb, "created_at", dates);
    qb.push(" ORDER BY created_at ASC, id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(AuditLogEntry::from_row).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AuditLogFilter) {
    if let Some(entity_type) = &filter.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(entity_id) = filter.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id);
    }
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(action) = &filter.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
    super::push_date_range(qb, "created_at", &filter.dates);
}
