//! Department persistence
//!
//! Departments are never hard-deleted; `active = 0` hides them from default
//! listings while keeping references from ideas, audits and NCRs intact.

use chrono::{DateTime, Utc};
use qms_common::query::{Page, PageRequest, Sort, SortField};
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub manager_id: Option<i64>,
    pub manager_name: Option<String>,
    pub active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDepartment {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub manager_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentChanges {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub manager_id: Option<i64>,
    pub active: Option<bool>,
}

/// Reject blank codes/names; codes are stored upper-case
pub(crate) fn normalize_code_and_name(code: &str, name: &str) -> Result<(String, String)> {
    let code = code.trim().to_uppercase();
    let name = name.trim().to_string();
    if code.is_empty() {
        return Err(Error::InvalidInput("Code is required".to_string()));
    }
    if name.is_empty() {
        return Err(Error::InvalidInput("Name is required".to_string()));
    }
    Ok((code, name))
}

impl NewDepartment {
    /// Trimmed copy with an upper-case code
    pub fn normalized(&self) -> Result<Self> {
        let (code, name) = normalize_code_and_name(&self.code, &self.name)?;
        Ok(Self {
            code,
            name,
            ..self.clone()
        })
    }
}

impl Department {
    pub fn apply_changes(&mut self, changes: DepartmentChanges) -> Result<()> {
        let (code, name) = normalize_code_and_name(
            changes.code.as_deref().unwrap_or(&self.code),
            changes.name.as_deref().unwrap_or(&self.name),
        )?;
        self.code = code;
        self.name = name;
        if changes.description.is_some() {
            self.description = changes.description;
        }
        if changes.manager_id.is_some() {
            self.manager_id = changes.manager_id;
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
            manager_id: row.try_get("manager_id")?,
            manager_name: row.try_get("manager_name")?,
            active: row.try_get("active")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct DepartmentFilter {
    pub include_inactive: bool,
    pub search: Option<String>,
}

qms_common::string_enum! {
    pub enum DepartmentSort("sort field") {
        Name => "name",
        Code => "code",
        CreatedAt => "createdAt",
    }
}

impl SortField for DepartmentSort {
    fn column(&self) -> &'static str {
        match self {
            DepartmentSort::Name => "name",
            DepartmentSort::Code => "code",
            DepartmentSort::CreatedAt => "created_at",
        }
    }
}

const SELECT_DEPARTMENTS: &str = r#"
    SELECT departments.*,
        (SELECT u.full_name FROM users u WHERE u.id = departments.manager_id) AS manager_name
    FROM departments
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Department>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_DEPARTMENTS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(Department::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &DepartmentFilter,
    sort: &Sort<DepartmentSort>,
    page: PageRequest,
) -> Result<Page<Department>> {
    super::fetch_page(
        pool,
        "departments",
        SELECT_DEPARTMENTS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        Department::from_row,
    )
    .await
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &DepartmentFilter) {
    if !filter.include_inactive {
        qb.push(" AND active = 1");
    }
    super::push_search(qb, &["code", "name"], filter.search.as_deref());
}

/// Which unique column, if any, `code`/`name` would collide on
///
/// `exclude_id` skips the row being updated.
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
        FROM departments
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

pub async fn insert<'e, E>(executor: E, department: &NewDepartment, created_by: i64) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = qms_common::time::now();
    let id = sqlx::query(
        r#"
        INSERT INTO departments (code, name, description, manager_id, active, created_by,
                                 created_at, updated_at)
        VALUES (?, ?, ?, ?, 1, ?, ?, ?)
        "#,
    )
    .bind(&department.code)
    .bind(&department.name)
    .bind(&department.description)
    .bind(department.manager_id)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(executor: E, department: &Department) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE departments SET
            code = ?, name = ?, description = ?, manager_id = ?, active = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&department.code)
    .bind(&department.name)
    .bind(&department.description)
    .bind(department.manager_id)
    .bind(department.active)
    .bind(qms_common::time::now())
    .bind(department.id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Soft delete
pub async fn deactivate<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE departments SET active = 0, updated_at = ? WHERE id = ?")
        .bind(qms_common::time::now())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
