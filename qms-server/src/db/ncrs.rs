//! Non-conformance report persistence

use chrono::{DateTime, NaiveDate, Utc};
use qms_common::db::next_number;
use qms_common::query::{DateRange, Page, PageRequest, Sort, SortField};
use qms_common::status::{NcrSeverity, NcrSource, NcrStatus};
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ncr {
    pub id: i64,
    pub ncr_number: String,
    pub title: String,
    pub description: String,
    pub source: NcrSource,
    pub severity: NcrSeverity,
    pub status: NcrStatus,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
    pub process_id: Option<i64>,
    pub assigned_to: Option<i64>,
    pub assigned_to_name: Option<String>,
    pub root_cause: Option<String>,
    pub containment_action: Option<String>,
    pub detected_date: NaiveDate,
    pub closed_date: Option<DateTime<Utc>>,
    pub capa_count: i64,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNcr {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source: NcrSource,
    pub severity: NcrSeverity,
    pub department_id: Option<i64>,
    pub process_id: Option<i64>,
    pub assigned_to: Option<i64>,
    pub containment_action: Option<String>,
    /// Defaults to today
    pub detected_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NcrChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<NcrSource>,
    pub severity: Option<NcrSeverity>,
    pub department_id: Option<i64>,
    pub process_id: Option<i64>,
    pub assigned_to: Option<i64>,
    pub root_cause: Option<String>,
    pub containment_action: Option<String>,
    pub detected_date: Option<NaiveDate>,
}

impl NewNcr {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Title is required".to_string()));
        }
        Ok(())
    }
}

impl Ncr {
    pub fn apply_changes(&mut self, changes: NcrChanges) -> Result<()> {
        if let Some(title) = changes.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput("Title is required".to_string()));
            }
            self.title = title;
        }
        if let Some(v) = changes.description {
            self.description = v;
        }
        if let Some(v) = changes.source {
            self.source = v;
        }
        if let Some(v) = changes.severity {
            self.severity = v;
        }
        if let Some(v) = changes.detected_date {
            self.detected_date = v;
        }
        if changes.department_id.is_some() {
            self.department_id = changes.department_id;
        }
        if changes.process_id.is_some() {
            self.process_id = changes.process_id;
        }
        if changes.assigned_to.is_some() {
            self.assigned_to = changes.assigned_to;
        }
        if changes.root_cause.is_some() {
            self.root_cause = changes.root_cause;
        }
        if changes.containment_action.is_some() {
            self.containment_action = changes.containment_action;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            ncr_number: row.try_get("ncr_number")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            source: row.try_get::<String, _>("source")?.parse()?,
            severity: row.try_get::<String, _>("severity")?.parse()?,
            status: row.try_get::<String, _>("status")?.parse()?,
            department_id: row.try_get("department_id")?,
            department_name: row.try_get("department_name")?,
            process_id: row.try_get("process_id")?,
            assigned_to: row.try_get("assigned_to")?,
            assigned_to_name: row.try_get("assigned_to_name")?,
            root_cause: row.try_get("root_cause")?,
            containment_action: row.try_get("containment_action")?,
            detected_date: row.try_get("detected_date")?,
            closed_date: row.try_get("closed_date")?,
            capa_count: row.try_get("capa_count")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct NcrFilter {
    pub status: Option<NcrStatus>,
    pub severity: Option<NcrSeverity>,
    pub source: Option<NcrSource>,
    pub department_id: Option<i64>,
    pub detected: DateRange,
}

qms_common::string_enum! {
    pub enum NcrSort("sort field") {
        DetectedDate => "detectedDate",
        CreatedAt => "createdAt",
        NcrNumber => "ncrNumber",
        Severity => "severity",
        Status => "status",
        Title => "title",
    }
}

impl SortField for NcrSort {
    fn column(&self) -> &'static str {
        match self {
            NcrSort::DetectedDate => "detected_date",
            NcrSort::CreatedAt => "created_at",
            NcrSort::NcrNumber => "ncr_number",
            NcrSort::Severity => "severity",
            NcrSort::Status => "status",
            NcrSort::Title => "title",
        }
    }
}

const SELECT_NCRS: &str = r#"
    SELECT ncrs.*,
        (SELECT d.name FROM departments d WHERE d.id = ncrs.department_id) AS department_name,
        (SELECT u.full_name FROM users u WHERE u.id = ncrs.assigned_to) AS assigned_to_name,
        (SELECT COUNT(*) FROM capas c WHERE c.ncr_id = ncrs.id) AS capa_count
    FROM ncrs
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Ncr>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_NCRS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(Ncr::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &NcrFilter,
    sort: &Sort<NcrSort>,
    page: PageRequest,
) -> Result<Page<Ncr>> {
    super::fetch_page(
        pool,
        "ncrs",
        SELECT_NCRS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        Ncr::from_row,
    )
    .await
}

/// NCRs detected within `dates`, oldest first
pub async fn find_in_range(pool: &SqlitePool, dates: &DateRange) -> Result<Vec<Ncr>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_NCRS);
    qb.push(" WHERE 1=1");
    super::push_date_range(&mut qb, "detected_date", dates);
    qb.push(" ORDER BY detected_date ASC, id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(Ncr::from_row).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &NcrFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(severity) = filter.severity {
        qb.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(source) = filter.source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(department_id) = filter.department_id {
        qb.push(" AND department_id = ").push_bind(department_id);
    }
    super::push_date_range(qb, "detected_date", &filter.detected);
}

pub async fn insert(conn: &mut SqliteConnection, ncr: &NewNcr, created_by: i64) -> Result<i64> {
    let number = next_number(&mut *conn, "ncrs", "ncr_number", "NCR").await?;
    let now = qms_common::time::now();

    let id = sqlx::query(
        r#"
        INSERT INTO ncrs (
            ncr_number, title, description, source, severity, status, department_id,
            process_id, assigned_to, containment_action, detected_date, created_by,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&number)
    .bind(ncr.title.trim())
    .bind(&ncr.description)
    .bind(ncr.source.as_str())
    .bind(ncr.severity.as_str())
    .bind(NcrStatus::Open.as_str())
    .bind(ncr.department_id)
    .bind(ncr.process_id)
    .bind(ncr.assigned_to)
    .bind(&ncr.containment_action)
    .bind(ncr.detected_date.unwrap_or_else(qms_common::time::today))
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(executor: E, ncr: &Ncr, expected_status: Option<NcrStatus>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expected = expected_status.map(|s| s.as_str());
    let result = sqlx::query(
        r#"
        UPDATE ncrs SET
            title = ?, description = ?, source = ?, severity = ?, status = ?,
            department_id = ?, process_id = ?, assigned_to = ?, root_cause = ?,
            containment_action = ?, detected_date = ?, closed_date = ?, updated_at = ?
        WHERE id = ? AND (? IS NULL OR status = ?)
        "#,
    )
    .bind(&ncr.title)
    .bind(&ncr.description)
    .bind(ncr.source.as_str())
    .bind(ncr.severity.as_str())
    .bind(ncr.status.as_str())
    .bind(ncr.department_id)
    .bind(ncr.process_id)
    .bind(ncr.assigned_to)
    .bind(&ncr.root_cause)
    .bind(&ncr.containment_action)
    .bind(ncr.detected_date)
    .bind(ncr.closed_date)
    .bind(qms_common::time::now())
    .bind(ncr.id)
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
    let result = sqlx::query("DELETE FROM ncrs WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
