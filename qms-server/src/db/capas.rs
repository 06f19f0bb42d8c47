//! Corrective and preventive action persistence

use chrono::{DateTime, NaiveDate, Utc};
use qms_common::db::next_number;
use qms_common::query::{DateRange, Page, PageRequest, Sort, SortField};
use qms_common::status::{CapaStatus, CapaType, Priority};
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capa {
    pub id: i64,
    pub capa_number: String,
    pub title: String,
    pub description: String,
    pub capa_type: CapaType,
    pub ncr_id: Option<i64>,
    pub ncr_number: Option<String>,
    pub priority: Priority,
    pub status: CapaStatus,
    pub root_cause: Option<String>,
    pub action_plan: Option<String>,
    pub responsible_user: Option<i64>,
    pub responsible_user_name: Option<String>,
    pub target_date: Option<NaiveDate>,
    pub completed_date: Option<DateTime<Utc>>,
    pub verified_by: Option<i64>,
    pub verifier_name: Option<String>,
    pub verified_date: Option<DateTime<Utc>>,
    pub effectiveness_notes: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCapa {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub capa_type: CapaType,
    pub ncr_id: Option<i64>,
    pub priority: Option<Priority>,
    pub root_cause: Option<String>,
    pub action_plan: Option<String>,
    pub responsible_user: Option<i64>,
    pub target_date: Option<NaiveDate>,
}

/// Editable fields; verification fields change only through actions
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapaChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub capa_type: Option<CapaType>,
    pub ncr_id: Option<i64>,
    pub priority: Option<Priority>,
    pub root_cause: Option<String>,
    pub action_plan: Option<String>,
    pub responsible_user: Option<i64>,
    pub target_date: Option<NaiveDate>,
}

impl NewCapa {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Title is required".to_string()));
        }
        Ok(())
    }
}

impl Capa {
    pub fn apply_changes(&mut self, changes: CapaChanges) -> Result<()> {
        if let Some(title) = changes.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput("Title is required".to_string()));
            }
            self.title = title;
        }
        if let Some(v) = changes.description {
            self.description = v;
        }
        if let Some(v) = changes.capa_type {
            self.capa_type = v;
        }
        if let Some(v) = changes.priority {
            self.priority = v;
        }
        if changes.ncr_id.is_some() {
            self.ncr_id = changes.ncr_id;
        }
        if changes.root_cause.is_some() {
            self.root_cause = changes.root_cause;
        }
        if changes.action_plan.is_some() {
            self.action_plan = changes.action_plan;
        }
        if changes.responsible_user.is_some() {
            self.responsible_user = changes.responsible_user;
        }
        if changes.target_date.is_some() {
            self.target_date = changes.target_date;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            capa_number: row.try_get("capa_number")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            capa_type: row.try_get::<String, _>("capa_type")?.parse()?,
            ncr_id: row.try_get("ncr_id")?,
            ncr_number: row.try_get("ncr_number")?,
            priority: row.try_get::<String, _>("priority")?.parse()?,
            status: row.try_get::<String, _>("status")?.parse()?,
            root_cause: row.try_get("root_cause")?,
            action_plan: row.try_get("action_plan")?,
            responsible_user: row.try_get("responsible_user")?,
            responsible_user_name: row.try_get("responsible_user_name")?,
            target_date: row.try_get("target_date")?,
            completed_date: row.try_get("completed_date")?,
            verified_by: row.try_get("verified_by")?,
            verifier_name: row.try_get("verifier_name")?,
            verified_date: row.try_get("verified_date")?,
            effectiveness_notes: row.try_get("effectiveness_notes")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct CapaFilter {
    pub status: Option<CapaStatus>,
    pub capa_type: Option<CapaType>,
    pub priority: Option<Priority>,
    pub ncr_id: Option<i64>,
}

qms_common::string_enum! {
    pub enum CapaSort("sort field") {
        CreatedAt => "createdAt",
        TargetDate => "targetDate",
        CapaNumber => "capaNumber",
        Priority => "priority",
        Status => "status",
        Title => "title",
    }
}

impl SortField for CapaSort {
    fn column(&self) -> &'static str {
        match self {
            CapaSort::CreatedAt => "created_at",
            CapaSort::TargetDate => "target_date",
            CapaSort::CapaNumber => "capa_number",
            CapaSort::Priority => "priority",
            CapaSort::Status => "status",
            CapaSort::Title => "title",
        }
    }
}

const SELECT_CAPAS: &str = r#"
    SELECT capas.*,
        (SELECT n.ncr_number FROM ncrs n WHERE n.id = capas.ncr_id) AS ncr_number,
        (SELECT u.full_name FROM users u WHERE u.id = capas.responsible_user) AS responsible_user_name,
        (SELECT u.full_name FROM users u WHERE u.id = capas.verified_by) AS verifier_name
    FROM capas
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Capa>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_CAPAS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(Capa::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &CapaFilter,
    sort: &Sort<CapaSort>,
    page: PageRequest,
) -> Result<Page<Capa>> {
    super::fetch_page(
        pool,
        "capas",
        SELECT_CAPAS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        Capa::from_row,
    )
    .await
}

/// CAPAs created within `dates`, oldest first
pub async fn find_in_range(pool: &SqlitePool, dates: &DateRange) -> Result<Vec<Capa>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_CAPAS);
    qb.push(" WHERE 1=1");
    super::push_date_range(&mut qb, "created_at", dates);
    qb.push(" ORDER BY created_at ASC, id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(Capa::from_row).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &CapaFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(capa_type) = filter.capa_type {
        qb.push(" AND capa_type = ").push_bind(capa_type.as_str());
    }
    if let Some(priority) = filter.priority {
        qb.push(" AND priority = ").push_bind(priority.as_str());
    }
    if let Some(ncr_id) = filter.ncr_id {
        qb.push(" AND ncr_id = ").push_bind(ncr_id);
    }
}

pub async fn insert(conn: &mut SqliteConnection, capa: &NewCapa, created_by: i64) -> Result<i64> {
    let number = next_number(&mut *conn, "capas", "capa_number", "CAPA").await?;
    let now = qms_common::time::now();

    let id = sqlx::query(
        r#"
        INSERT INTO capas (
            capa_number, title, description, capa_type, ncr_id, priority, status,
            root_cause, action_plan, responsible_user, target_date, created_by,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&number)
    .bind(capa.title.trim())
    .bind(&capa.description)
    .bind(capa.capa_type.as_str())
    .bind(capa.ncr_id)
    .bind(capa.priority.unwrap_or(Priority::Medium).as_str())
    .bind(CapaStatus::Open.as_str())
    .bind(&capa.root_cause)
    .bind(&capa.action_plan)
    .bind(capa.responsible_user)
    .bind(capa.target_date)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(executor: E, capa: &Capa, expected_status: Option<CapaStatus>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expected = expected_status.map(|s| s.as_str());
    let result = sqlx::query(
        r#"
        UPDATE capas SET
            title = ?, description = ?, capa_type = ?, ncr_id = ?, priority = ?, status = ?,
            root_cause = ?, action_plan = ?, responsible_user = ?, target_date = ?,
            completed_date = ?, verified_by = ?, verified_date = ?, effectiveness_notes = ?,
            updated_at = ?
        WHERE id = ? AND (? IS NULL OR status = ?)
        "#,
    )
    .bind(&capa.title)
    .bind(&capa.description)
    .bind(capa.capa_type.as_str())
    .bind(capa.ncr_id)
    .bind(capa.priority.as_str())
    .bind(capa.status.as_str())
    .bind(&capa.root_cause)
    .bind(&capa.action_plan)
    .bind(capa.responsible_user)
    .bind(capa.target_date)
    .bind(capa.completed_date)
    .bind(capa.verified_by)
    .bind(capa.verified_date)
    .bind(&capa.effectiveness_notes)
    .bind(qms_common::time::now())
    .bind(capa.id)
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
    let result = sqlx::query("DELETE FROM capas WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
