//! Role persistence

use chrono::{DateTime, Utc};
use qms_common::auth::level;
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub level: i64,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub level: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub level: Option<i64>,
}

fn validate_level(value: i64) -> Result<()> {
    if !(level::VIEWER..=level::SUPERUSER).contains(&value) {
        return Err(Error::InvalidInput(format!(
            "Role level must be between {} and {}",
            level::VIEWER,
            level::SUPERUSER
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(Error::InvalidInput("Role name is required".to_string()));
    }
    Ok(name)
}

impl NewRole {
    /// Trimmed, lower-case copy with a checked level
    pub fn normalized(&self) -> Result<Self> {
        validate_level(self.level)?;
        Ok(Self {
            name: validate_name(&self.name)?,
            ..self.clone()
        })
    }
}

impl Role {
    pub fn apply_changes(&mut self, changes: RoleChanges) -> Result<()> {
        if let Some(name) = changes.name {
            self.name = validate_name(&name)?;
        }
        if changes.description.is_some() {
            self.description = changes.description;
        }
        if let Some(value) = changes.level {
            validate_level(value)?;
            self.level = value;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            level: row.try_get("level")?,
            user_count: row.try_get("user_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_ROLES: &str = r#"
    SELECT roles.*,
        (SELECT COUNT(*) FROM user_roles ur WHERE ur.role_id = roles.id) AS user_count
    FROM roles
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Role>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_ROLES);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(Role::from_row).transpose()
}

/// All roles, highest level first
pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Role>> {
    let sql = format!("{} ORDER BY level DESC, name ASC", SELECT_ROLES);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(Role::from_row).collect()
}

pub async fn name_taken<'e, E>(executor: E, name: &str, exclude_id: Option<i64>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM roles WHERE name = ? AND id != COALESCE(?, -1)")
            .bind(name)
            .bind(exclude_id)
            .fetch_one(executor)
            .await?;
    Ok(count > 0)
}

/// Highest level among the named roles; unknown names are ignored
pub async fn max_level<'e, E>(executor: E, names: &[String]) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    if names.is_empty() {
        return Ok(level::VIEWER);
    }
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COALESCE(MAX(level), 0) FROM roles WHERE name IN (");
    let mut separated = qb.separated(", ");
    for name in names {
        separated.push_bind(name.clone());
    }
    separated.push_unseparated(")");

    let value = qb.build_query_scalar::<i64>().fetch_one(executor).await?;
    Ok(value)
}

pub async fn insert<'e, E>(executor: E, role: &NewRole) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = qms_common::time::now();
    let id = sqlx::query(
        "INSERT INTO roles (name, description, level, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&role.name)
    .bind(&role.description)
    .bind(role.level)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(executor: E, role: &Role) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE roles SET name = ?, description = ?, level = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&role.name)
    .bind(&role.description)
    .bind(role.level)
    .bind(qms_common::time::now())
    .bind(role.id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_role_is_normalized() {
        let role = NewRole {
            name: "  Process Owner ".to_string(),
            description: None,
            level: 40,
        };
        assert_eq!(role.normalized().unwrap().name, "process owner");
    }

    #[test]
    fn test_level_out_of_range_rejected() {
        let mut role = NewRole {
            name: "x".to_string(),
            description: None,
            level: 101,
        };
        assert!(role.normalized().is_err());
        role.level = -1;
        assert!(role.normalized().is_err());
    }
}
