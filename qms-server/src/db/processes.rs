//! Business process persistence (soft delete, like departments)

use chrono::{DateTime, Utc};
use qms_common::query::{Page, PageRequest, Sort, SortField};
use qms_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

use super::departments::normalize_code_and_name;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
    pub owner_id: Option<i64>,
    pub owner_name: Option<String>,
    pub active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProcess {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub department_id: Option<i64>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessChanges {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub department_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub active: Option<bool>,
}

impl NewProcess {
    pub fn normalized(&self) -> Result<Self> {
        let (code, name) = normalize_code_and_name(&self.code, &self.name)?;
        Ok(Self {
            code,
            name,
            ..self.clone()
        })
    }
}

impl Process {
    pub fn apply_changes(&mut self, changes: ProcessChanges) -> Result<()> {
        let (code, name) = normalize_code_and_name(
            changes.code.as_deref().unwrap_or(&self.code),
            changes.name.as_deref().unwrap_or(&self.name),
        )?;
        self.code = code;
        self.name = name;
        if changes.description.is_some() {
            self.description = changes.description;
        }
        if changes.department_id.is_some() {
            self.department_id = changes.department_id;
        }
        if changes.owner_id.is_some() {
            self.owner_id = changes.owner_id;
        }
        if let Some(active) = changes.active {
            self.active = active;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            department_id: row.try_get("department_id")?,
            department_name: row.try_get("department_name")?,
            owner_id: row.try_get("owner_id")?,
            owner_name: row.try_get("owner_name")?,
            active: row.try_get("active")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct ProcessFilter {
    pub include_inactive: bool,
    pub search: Option<String>,
    pub department_id: Option<i64>,
}

qms_common::string_enum! {
    pub enum ProcessSort("sort field") {
        Name => "name",
        Code => "code",
        CreatedAt => "createdAt",
    }
}

impl SortField for ProcessSort {
    fn column(&self) -> &'static str {
        match self {
            ProcessSort::Name => "name",
            ProcessSort::Code => "code",
            ProcessSort::CreatedAt => "created_at",
        }
    }
}

const SELECT_PROCESSES: &str = r#"
    SELECT processes.*,
        (SELECT d.name FROM departments d WHERE d.id = processes.department_id) AS department_name,
        (SELECT u.full_name FROM users u WHERE u.id = processes.owner_id) AS owner_name
    FROM processes
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Process>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_PROCESSES);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(Process::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &ProcessFilter,
    sort: &Sort<ProcessSort>,
    page: PageRequest,
) -> Result<Page<Process>> {
    super::fetch_page(
        pool,
        "processes",
        SELECT_PROCESSES,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        Process::from_row,
    )
    .await
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ProcessFilter) {
    if !filter.include_inactive {
        qb.push(" AND active = 1");
    }
    if let Some(department_id) = filter.department_id {
        qb.push(" AND department_id = ").push_bind(department_id);
    }
    super::push_search(qb, &["code", "name"], filter.search.as_deref());
}

/// Which unique column, if any, `code`/`name` would collide on
pub async fn find_duplicate<'e, E>(
    executor: E,
    code: &str,
    name: &str,
    exclude_id: Option<i64>,
) -> Result<Option<&'static str>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN code = ? THEN 1 ELSE 0 END), 0) AS codes,
            COALESCE(SUM(CASE WHEN name = ? THEN 1 ELSE 0 END), 0) AS names
        FROM processes
        WHERE id != COALESCE(?, -1)
        "#,
    )
    .bind(code)
    .bind(name)
    .bind(exclude_id)
    .fetch_one(executor)
    .await?;

    if row.try_get::<i64, _>("codes")? > 0 {
        Ok(Some("code"))
    } else if row.try_get::<i64, _>("names")? > 0 {
        Ok(Some("name"))
    } else {
        Ok(None)
    }
}

pub async fn insert<'e, E>(executor: E, process: &NewProcess, created_by: i64) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = qms_common::time::now();
    let id = sqlx::query(
        r#"
        INSERT INTO processes (code, name, description, department_id, owner_id, active,
                               created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
        "#,
    )
    .bind(&process.code)
    .bind(&process.name)
    .bind(&process.description)
    .bind(process.department_id)
    .bind(process.owner_id)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(executor: E, process: &Process) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE processes SET
            code = ?, name = ?, description = ?, department_id = ?, owner_id = ?, active = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&process.code)
    .bind(&process.name)
    .bind(&process.description)
    .bind(process.department_id)
    .bind(process.owner_id)
    .bind(process.active)
    .bind(qms_common::time::now())
    .bind(process.id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn deactivate<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE processes SET active = 0, updated_at = ? WHERE id = ?")
        .bind(qms_common::time::now())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
