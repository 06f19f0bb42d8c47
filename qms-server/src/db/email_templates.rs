//! Email template persistence

use chrono::{DateTime, Utc};
use qms_common::query::{Page, PageRequest, Sort, SortField};
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEmailTemplate {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplateChanges {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

impl NewEmailTemplate {
    pub fn validate(&self) -> Result<()> {
        require("Name", &self.name)?;
        require("Subject", &self.subject)?;
        require("Body", &self.body)
    }
}

impl EmailTemplate {
    pub fn apply_changes(&mut self, changes: EmailTemplateChanges) -> Result<()> {
        if let Some(name) = changes.name {
            require("Name", &name)?;
            self.name = name.trim().to_string();
        }
        if let Some(subject) = changes.subject {
            require("Subject", &subject)?;
            self.subject = subject;
        }
        if let Some(body) = changes.body {
            require("Body", &body)?;
            self.body = body;
        }
        if changes.description.is_some() {
            self.description = changes.description;
        }
        if changes.category.is_some() {
            self.category = changes.category;
        }
        if let Some(active) = changes.active {
            self.active = active;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            active: row.try_get("active")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct EmailTemplateFilter {
    pub category: Option<String>,
    pub include_inactive: bool,
    pub search: Option<String>,
}

qms_common::string_enum! {
    pub enum EmailTemplateSort("sort field") {
        Name => "name",
        Category => "category",
        CreatedAt => "createdAt",
        UpdatedAt => "updatedAt",
    }
}

impl SortField for EmailTemplateSort {
    fn column(&self) -> &'static str {
        match self {
            EmailTemplateSort::Name => "name",
            EmailTemplateSort::Category => "category",
            EmailTemplateSort::CreatedAt => "created_at",
            EmailTemplateSort::UpdatedAt => "updated_at",
        }
    }
}

const SELECT_TEMPLATES: &str = "SELECT * FROM email_templates";

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<EmailTemplate>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_TEMPLATES);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(EmailTemplate::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &EmailTemplateFilter,
    sort: &Sort<EmailTemplateSort>,
    page: PageRequest,
) -> Result<Page<EmailTemplate>> {
    super::fetch_page(
        pool,
        "email_templates",
        SELECT_TEMPLATES,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        EmailTemplate::from_row,
    )
    .await
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &EmailTemplateFilter) {
    if !filter.include_inactive {
        qb.push(" AND active = 1");
    }
    if let Some(category) = &filter.category {
        qb.push(" AND category = ").push_bind(category.clone());
    }
    super::push_search(qb, &["name", "subject"], filter.search.as_deref());
}

pub async fn name_taken<'e, E>(executor: E, name: &str, exclude_id: Option<i64>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM email_templates WHERE name = ? AND id != COALESCE(?, -1)",
    )
    .bind(name)
    .bind(exclude_id)
    .fetch_one(executor)
    .await?;
    Ok(count > 0)
}

pub async fn insert<'e, E>(executor: E, template: &NewEmailTemplate, created_by: i64) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = qms_common::time::now();
    let id = sqlx::query(
        r#"
        INSERT INTO email_templates (name, subject, body, description, category, active,
                                     created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
        "#,
    )
    .bind(template.name.trim())
    .bind(&template.subject)
    .bind(&template.body)
    .bind(&template.description)
    .bind(&template.category)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn update<'e, E>(executor: E, template: &EmailTemplate) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE email_templates SET
            name = ?, subject = ?, body = ?, description = ?, category = ?, active = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&template.name)
    .bind(&template.subject)
    .bind(&template.body)
    .bind(&template.description)
    .bind(&template.category)
    .bind(template.active)
    .bind(qms_common::time::now())
    .bind(template.id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete<'e, E>(executor: E, id: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM email_templates WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}
