//! Audit persistence

use chrono::{DateTime, NaiveDate, Utc};
use qms_common::db::next_number;
use qms_common::query::{DateRange, Page, PageRequest, Sort, SortField};
use qms_common::status::{AuditStatus, AuditType};
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub id: i64,
    pub audit_number: String,
    pub title: String,
    pub audit_type: AuditType,
    pub scope: Option<String>,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
    pub lead_auditor_id: Option<i64>,
    pub lead_auditor_name: Option<String>,
    pub scheduled_date: NaiveDate,
    pub actual_start_date: Option<NaiveDate>,
    pub actual_end_date: Option<NaiveDate>,
    pub status: AuditStatus,
    pub finding_count: i64,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAudit {
    pub title: String,
    pub audit_type: AuditType,
    pub scope: Option<String>,
    pub department_id: Option<i64>,
    pub lead_auditor_id: Option<i64>,
    pub scheduled_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditChanges {
    pub title: Option<String>,
    pub audit_type: Option<AuditType>,
    pub scope: Option<String>,
    pub department_id: Option<i64>,
    pub lead_auditor_id: Option<i64>,
    pub scheduled_date: Option<NaiveDate>,
}

impl NewAudit {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Title is required".to_string()));
        }
        Ok(())
    }
}

impl Audit {
    pub fn apply_changes(&mut self, changes: AuditChanges) -> Result<()> {
        if let Some(title) = changes.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput("Title is required".to_string()));
            }
            self.title = title;
        }
        if let Some(audit_type) = changes.audit_type {
            self.audit_type = audit_type;
        }
        if changes.scope.is_some() {
            self.scope = changes.scope;
        }
        if changes.department_id.is_some() {
            self.department_id = changes.department_id;
        }
        if changes.lead_auditor_id.is_some() {
            self.lead_auditor_id = changes.lead_auditor_id;
        }
        if let Some(date) = changes.scheduled_date {
            self.scheduled_date = date;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            audit_number: row.try_get("audit_number")?,
            title: row.try_get("title")?,
            audit_type: row.try_get::<String, _>("audit_type")?.parse()?,
            scope: row.try_get("scope")?,
            department_id: row.try_get("department_id")?,
            department_name: row.try_get("department_name")?,
            lead_auditor_id: row.try_get("lead_auditor_id")?,
            lead_auditor_name: row.try_get("lead_auditor_name")?,
            scheduled_date: row.try_get("scheduled_date")?,
            actual_start_date: row.try_get("actual_start_date")?,
            actual_end_date: row.try_get("actual_end_date")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            finding_count: row.try_get("finding_count")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct AuditFilter {
    pub status: Option<AuditStatus>,
    pub audit_type: Option<AuditType>,
    pub department_id: Option<i64>,
    pub scheduled: DateRange,
}

qms_common::string_enum! {
    pub enum AuditSort("sort field") {
        ScheduledDate => "scheduledDate",
        CreatedAt => "createdAt",
        AuditNumber => "auditNumber",
        Title => "title",
        Status => "status",
    }
}

impl SortField for AuditSort {
    fn column(&self) -> &'static str {
        match self {
            AuditSort::ScheduledDate => "scheduled_date",
            AuditSort::CreatedAt => "created_at",
            AuditSort::AuditNumber => "audit_number",
            AuditSort::Title => "title",
            AuditSort::Status => "status",
        }
    }
}

const SELECT_AUDITS: &str = r#"
    SELECT audits.*,
        (SELECT d.name FROM departments d WHERE d.id = audits.department_id) AS department_name,
        (SELECT u.full_name FROM users u WHERE u.id = audits.lead_auditor_id) AS lead_auditor_name,
        (SELECT COUNT(*) FROM audit_findings f WHERE f.audit_id = audits.id) AS finding_count
    FROM audits
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Audit>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_AUDITS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(Audit::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &AuditFilter,
    sort: &Sort<AuditSort>,
    page: PageRequest,
) -> Result<Page<Audit>> {
    super::fetch_page(
        pool,
        "audits",
        SELECT_AUDITS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        Audit::from_row,
    )
    .await
}

/// Audits scheduled within `dates`, oldest first
pub async fn find_in_range(pool: &SqlitePool, dates: &DateRange) -> Result<Vec<Audit>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_AUDITS);
    qb.push(" WHERE 1=1");
    super::push_date_range(&mut qb, "scheduled_date", dates);
    qb.push(" ORDER BY scheduled_date ASC, id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(Audit::from_row).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AuditFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(audit_type) = filter.audit_type {
        qb.push(" AND audit_type = ").push_bind(audit_type.as_str());
    }
    if let Some(department_id) = filter.department_id {
        qb.push(" AND department_id = ").push_bind(department_id);
    }
    super::push_date_range(qb, "scheduled_date", &filter.scheduled);
}

pub async fn insert(conn: &mut SqliteConnection, audit: &NewAudit, created_by: i64) -> Result<i64> {
    let number = next_number(&mut *conn, "audits", "audit_number", "AUD").await?;
    let now = qms_common::time::now();

    let id = sqlx::query(
        r#"
        INSERT INTO audits (
            audit_number, title, audit_type, scope, department_id, lead_auditor_id,
            scheduled_date, status, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&number)
    .bind(audit.title.trim())
    .bind(audit.audit_type.as_str())
    .bind(&audit.scope)
    .bind(audit.department_id)
    .bind(audit.lead_auditor_id)
    .bind(audit.scheduled_date)
    .bind(AuditStatus::Planned.as_str())
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(
    executor: E,
    audit: &Audit,
    expected_status: Option<AuditStatus>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expected = expected_status.map(|s| s.as_str());
    let result = sqlx::query(
        r#"
        UPDATE audits SET
            title = ?, audit_type = ?, scope = ?, department_id = ?, lead_auditor_id = ?,
            scheduled_date = ?, actual_start_date = ?, actual_end_date = ?, status = ?,
            updated_at = ?
        WHERE id = ? AND (? IS NULL OR status = ?)
        "#,
    )
    .bind(&audit.title)
    .bind(audit.audit_type.as_str())
    .bind(&audit.scope)
    .bind(audit.department_id)
    .bind(audit.lead_auditor_id)
    .bind(audit.scheduled_date)
    .bind(audit.actual_start_date)
    .bind(audit.actual_end_date)
    .bind(audit.status.as_str())
    .bind(qms_common::time::now())
    .bind(audit.id)
    .bind(expected)
    .bind(expected)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM audits WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
