//! Audit finding persistence

use chrono::{DateTime, NaiveDate, Utc};
use qms_common::query::{Page, PageRequest, Sort, SortField};
use qms_common::status::{FindingSeverity, FindingStatus};
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFinding {
    pub id: i64,
    pub audit_id: i64,
    pub audit_number: Option<String>,
    pub title: String,
    pub description: String,
    pub severity: FindingSeverity,
    pub status: FindingStatus,
    pub clause_reference: Option<String>,
    pub evidence: Option<String>,
    pub requires_ncr: bool,
    pub ncr_id: Option<i64>,
    pub ncr_number: Option<String>,
    pub assigned_to: Option<i64>,
    pub assigned_to_name: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFinding {
    pub audit_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: FindingSeverity,
    pub clause_reference: Option<String>,
    pub evidence: Option<String>,
    #[serde(default)]
    pub requires_ncr: bool,
    pub assigned_to: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub severity: Option<FindingSeverity>,
    pub status: Option<FindingStatus>,
    pub clause_reference: Option<String>,
    pub evidence: Option<String>,
    pub requires_ncr: Option<bool>,
    pub assigned_to: Option<i64>,
    pub due_date: Option<NaiveDate>,
}

impl NewFinding {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Title is required".to_string()));
        }
        Ok(())
    }
}

impl AuditFinding {
    pub fn apply_changes(&mut self, changes: FindingChanges) -> Result<()> {
        if let Some(title) = changes.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput("Title is required".to_string()));
            }
            self.title = title;
        }
        if let Some(v) = changes.description {
            self.description = v;
        }
        if let Some(v) = changes.severity {
            self.severity = v;
        }
        if let Some(v) = changes.status {
            self.status = v;
        }
        if let Some(v) = changes.requires_ncr {
            self.requires_ncr = v;
        }
        if changes.clause_reference.is_some() {
            self.clause_reference = changes.clause_reference;
        }
        if changes.evidence.is_some() {
            self.evidence = changes.evidence;
        }
        if changes.assigned_to.is_some() {
            self.assigned_to = changes.assigned_to;
        }
        if changes.due_date.is_some() {
            self.due_date = changes.due_date;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            audit_id: row.try_get("audit_id")?,
            audit_number: row.try_get("audit_number")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            severity: row.try_get::<String, _>("severity")?.parse()?,
            status: row.try_get::<String, _>("status")?.parse()?,
            clause_reference: row.try_get("clause_reference")?,
            evidence: row.try_get("evidence")?,
            requires_ncr: row.try_get("requires_ncr")?,
            ncr_id: row.try_get("ncr_id")?,
            ncr_number: row.try_get("ncr_number")?,
            assigned_to: row.try_get("assigned_to")?,
            assigned_to_name: row.try_get("assigned_to_name")?,
            due_date: row.try_get("due_date")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct FindingFilter {
    pub audit_id: Option<i64>,
    pub severity: Option<FindingSeverity>,
    pub status: Option<FindingStatus>,
}

qms_common::string_enum! {
    pub enum FindingSort("sort field") {
        CreatedAt => "createdAt",
        Severity => "severity",
        Status => "status",
        DueDate => "dueDate",
        Title => "title",
    }
}

impl SortField for FindingSort {
    fn column(&self) -> &'static str {
        match self {
            FindingSort::CreatedAt => "created_at",
            FindingSort::Severity => "severity",
            FindingSort::Status => "status",
            FindingSort::DueDate => "due_date",
            FindingSort::Title => "title",
        }
    }
}

/// Per-audit finding counts; every severity and status key is present
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingStatistics {
    pub total: i64,
    pub by_severity: BTreeMap<String, i64>,
    pub by_status: BTreeMap<String, i64>,
}

const SELECT_FINDINGS: &str = r#"
    SELECT audit_findings.*,
        (SELECT a.audit_number FROM audits a WHERE a.id = audit_findings.audit_id) AS audit_number,
        (SELECT n.ncr_number FROM ncrs n WHERE n.id = audit_findings.ncr_id) AS ncr_number,
        (SELECT u.full_name FROM users u WHERE u.id = audit_findings.assigned_to) AS assigned_to_name
    FROM audit_findings
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<AuditFinding>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_FINDINGS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(AuditFinding::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &FindingFilter,
    sort: &Sort<FindingSort>,
    page: PageRequest,
) -> Result<Page<AuditFinding>> {
    super::fetch_page(
        pool,
        "audit_findings",
        SELECT_FINDINGS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        AuditFinding::from_row,
    )
    .await
}

/// Findings of the given audits, grouped by the caller
pub async fn find_by_audits(pool: &SqlitePool, audit_ids: &[i64]) -> Result<Vec<AuditFinding>> {
    if audit_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_FINDINGS);
    qb.push(" WHERE audit_id IN (");
    let mut separated = qb.separated(", ");
    for id in audit_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
    qb.push(" ORDER BY audit_id ASC, id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(AuditFinding::from_row).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &FindingFilter) {
    if let Some(audit_id) = filter.audit_id {
        qb.push(" AND audit_id = ").push_bind(audit_id);
    }
    if let Some(severity) = filter.severity {
        qb.push(" AND severity = ").push_bind(severity.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

pub async fn insert<'e, E>(executor: E, finding: &NewFinding, created_by: i64) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = qms_common::time::now();
    let id = sqlx::query(
        r#"
        INSERT INTO audit_findings (
            audit_id, title, description, severity, status, clause_reference, evidence,
            requires_ncr, assigned_to, due_date, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(finding.audit_id)
    .bind(finding.title.trim())
    .bind(&finding.description)
    .bind(finding.severity.as_str())
    .bind(FindingStatus::Open.as_str())
    .bind(&finding.clause_reference)
    .bind(&finding.evidence)
    .bind(finding.requires_ncr)
    .bind(finding.assigned_to)
    .bind(finding.due_date)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(executor: E, finding: &AuditFinding) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE audit_findings SET
            title = ?, description = ?, severity = ?, status = ?, clause_reference = ?,
            evidence = ?, requires_ncr = ?, ncr_id = ?, assigned_to = ?, due_date = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&finding.title)
    .bind(&finding.description)
    .bind(finding.severity.as_str())
    .bind(finding.status.as_str())
    .bind(&finding.clause_reference)
    .bind(&finding.evidence)
    .bind(finding.requires_ncr)
    .bind(finding.ncr_id)
    .bind(finding.assigned_to)
    .bind(finding.due_date)
    .bind(qms_common::time::now())
    .bind(finding.id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM audit_findings WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn statistics(pool: &SqlitePool, audit_id: i64) -> Result<FindingStatistics> {
    let mut by_severity: BTreeMap<String, i64> = FindingSeverity::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    let mut by_status: BTreeMap<String, i64> = FindingStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();

    let rows = sqlx::query(
        "SELECT severity, status, COUNT(*) AS n FROM audit_findings WHERE audit_id = ? GROUP BY severity, status",
    )
    .bind(audit_id)
    .fetch_all(pool)
    .await?;

    let mut total = 0;
    for row in &rows {
        let n: i64 = row.try_get("n")?;
        total += n;
        *by_severity.entry(row.try_get("severity")?).or_insert(0) += n;
        *by_status.entry(row.try_get("status")?).or_insert(0) += n;
    }

    Ok(FindingStatistics {
        total,
        by_severity,
        by_status,
    })
}
