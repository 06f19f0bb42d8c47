//! Skill level persistence

use chrono::{DateTime, Utc};
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillLevel {
    pub id: i64,
    pub level: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSkillLevel {
    pub level: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillLevelChanges {
    pub level: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
}

fn check(level: i64, name: &str) -> Result<()> {
    if level < 1 {
        return Err(Error::InvalidInput("Skill level must be at least 1".to_string()));
    }
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("Name is required".to_string()));
    }
    Ok(())
}

impl NewSkillLevel {
    pub fn validate(&self) -> Result<()> {
        check(self.level, &self.name)
    }
}

impl SkillLevel {
    pub fn apply_changes(&mut self, changes: SkillLevelChanges) -> Result<()> {
        let level = changes.level.unwrap_or(self.level);
        let name = changes.name.unwrap_or_else(|| self.name.clone());
        check(level, &name)?;
        self.level = level;
        self.name = name.trim().to_string();
        if changes.description.is_some() {
            self.description = changes.description;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            level: row.try_get("level")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<SkillLevel>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM skill_levels WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(SkillLevel::from_row).transpose()
}

/// Whole scale, lowest level first
pub async fn find_all(pool: &SqlitePool) -> Result<Vec<SkillLevel>> {
    let rows = sqlx::query("SELECT * FROM skill_levels ORDER BY level ASC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(SkillLevel::from_row).collect()
}

/// Which unique column, if any, `level`/`name` would collide on
pub async fn find_duplicate<'e, E>(
    executor: E,
    level: i64,
    name: &str,
    exclude_id: Option<i64>,
) -> Result<Option<&'static str>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN level = ? THEN 1 ELSE 0 END), 0) AS levels,
            COALESCE(SUM(CASE WHEN name = ? THEN 1 ELSE 0 END), 0) AS names
        FROM skill_levels
        WHERE id != COALESCE(?, -1)
        "#,
    )
    .bind(level)
    .bind(name)
    .bind(exclude_id)
    .fetch_one(executor)
    .await?;

    if row.try_get::<i64, _>("levels")? > 0 {
        Ok(Some("level"))
    } else if row.try_get::<i64, _>("names")? > 0 {
        Ok(Some("name"))
    } else {
        Ok(None)
    }
}

pub async fn insert<'e, E>(executor: E, skill: &NewSkillLevel) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = qms_common::time::now();
    let id = sqlx::query(
        "INSERT INTO skill_levels (level, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(skill.level)
    .bind(skill.name.trim())
    .bind(&skill.description)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(executor: E, skill: &SkillLevel) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE skill_levels SET level = ?, name = ?, description = ?, updated_at = ? WHERE id = ?",
    )
    .bind(skill.level)
    .bind(&skill.name)
    .bind(&skill.description)
    .bind(qms_common::time::now())
    .bind(skill.id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM skill_levels WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
