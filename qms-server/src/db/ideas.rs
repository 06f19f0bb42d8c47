//! Improvement idea persistence

use chrono::{DateTime, Utc};
use qms_common::db::next_number;
use qms_common::query::{DateRange, Page, PageRequest, Sort, SortField};
use qms_common::status::IdeaStatus;
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;

/// Improvement idea with submitter/reviewer display names
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovementIdea {
    pub id: i64,
    pub idea_number: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub expected_benefits: Option<String>,
    pub estimated_cost: Option<f64>,
    pub estimated_benefit: Option<f64>,
    pub department_id: Option<i64>,
    pub submitted_by: i64,
    pub submitter_name: Option<String>,
    pub responsible_user: Option<i64>,
    pub responsible_user_name: Option<String>,
    pub status: IdeaStatus,
    pub review_comments: Option<String>,
    pub reviewed_by: Option<i64>,
    pub reviewer_name: Option<String>,
    pub reviewed_date: Option<DateTime<Utc>>,
    pub implementation_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIdea {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    pub expected_benefits: Option<String>,
    pub estimated_cost: Option<f64>,
    pub estimated_benefit: Option<f64>,
    pub department_id: Option<i64>,
    pub responsible_user: Option<i64>,
}

/// Editable fields; status and review fields change only through actions
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub expected_benefits: Option<String>,
    pub estimated_cost: Option<f64>,
    pub estimated_benefit: Option<f64>,
    pub department_id: Option<i64>,
    pub responsible_user: Option<i64>,
    pub implementation_notes: Option<String>,
}

fn validate_amounts(cost: Option<f64>, benefit: Option<f64>) -> Result<()> {
    for (field, value) in [("estimatedCost", cost), ("estimatedBenefit", benefit)] {
        if matches!(value, Some(v) if !v.is_finite() || v < 0.0) {
            return Err(Error::InvalidInput(format!("{} must not be negative", field)));
        }
    }
    Ok(())
}

impl NewIdea {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("Title is required".to_string()));
        }
        validate_amounts(self.estimated_cost, self.estimated_benefit)
    }
}

impl ImprovementIdea {
    /// Copy the supplied fields of `changes` over this record
    pub fn apply_changes(&mut self, changes: IdeaChanges) -> Result<()> {
        if let Some(title) = changes.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput("Title is required".to_string()));
            }
            self.title = title;
        }
        validate_amounts(changes.estimated_cost, changes.estimated_benefit)?;

        if let Some(v) = changes.description {
            self.description = v;
        }
        if changes.category.is_some() {
            self.category = changes.category;
        }
        if changes.expected_benefits.is_some() {
            self.expected_benefits = changes.expected_benefits;
        }
        if changes.estimated_cost.is_some() {
            self.estimated_cost = changes.estimated_cost;
        }
        if changes.estimated_benefit.is_some() {
            self.estimated_benefit = changes.estimated_benefit;
        }
        if changes.department_id.is_some() {
            self.department_id = changes.department_id;
        }
        if changes.responsible_user.is_some() {
            self.responsible_user = changes.responsible_user;
        }
        if changes.implementation_notes.is_some() {
            self.implementation_notes = changes.implementation_notes;
        }
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            idea_number: row.try_get("idea_number")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            expected_benefits: row.try_get("expected_benefits")?,
            estimated_cost: row.try_get("estimated_cost")?,
            estimated_benefit: row.try_get("estimated_benefit")?,
            department_id: row.try_get("department_id")?,
            submitted_by: row.try_get("submitted_by")?,
            submitter_name: row.try_get("submitter_name")?,
            responsible_user: row.try_get("responsible_user")?,
            responsible_user_name: row.try_get("responsible_user_name")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            review_comments: row.try_get("review_comments")?,
            reviewed_by: row.try_get("reviewed_by")?,
            reviewer_name: row.try_get("reviewer_name")?,
            reviewed_date: row.try_get("reviewed_date")?,
            implementation_notes: row.try_get("implementation_notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct IdeaFilter {
    pub status: Option<IdeaStatus>,
    pub category: Option<String>,
    pub department_id: Option<i64>,
    pub submitted_by: Option<i64>,
    pub search: Option<String>,
    pub created: DateRange,
}

qms_common::string_enum! {
    pub enum IdeaSort("sort field") {
        CreatedAt => "createdAt",
        UpdatedAt => "updatedAt",
        IdeaNumber => "ideaNumber",
        Title => "title",
        Status => "status",
        Category => "category",
    }
}

impl SortField for IdeaSort {
    fn column(&self) -> &'static str {
        match self {
            IdeaSort::CreatedAt => "created_at",
            IdeaSort::UpdatedAt => "updated_at",
            IdeaSort::IdeaNumber => "idea_number",
            IdeaSort::Title => "title",
            IdeaSort::Status => "status",
            IdeaSort::Category => "category",
        }
    }
}

/// Counts for the statistics endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaStatistics {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_category: BTreeMap<String, i64>,
}

const SELECT_IDEAS: &str = r#"
    SELECT improvement_ideas.*,
        (SELECT u.full_name FROM users u WHERE u.id = improvement_ideas.submitted_by) AS submitter_name,
        (SELECT u.full_name FROM users u WHERE u.id = improvement_ideas.responsible_user) AS responsible_user_name,
        (SELECT u.full_name FROM users u WHERE u.id = improvement_ideas.reviewed_by) AS reviewer_name
    FROM improvement_ideas
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<ImprovementIdea>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_IDEAS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(ImprovementIdea::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &IdeaFilter,
    sort: &Sort<IdeaSort>,
    page: PageRequest,
) -> Result<Page<ImprovementIdea>> {
    super::fetch_page(
        pool,
        "improvement_ideas",
        SELECT_IDEAS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        ImprovementIdea::from_row,
    )
    .await
}

/// Ideas submitted within `dates`, oldest first
pub async fn find_in_range(pool: &SqlitePool, dates: &DateRange) -> Result<Vec<ImprovementIdea>> {
    let mut qb = QueryBuilder::<Sqlite>::new(SELECT_IDEAS);
    qb.push(" WHERE 1=1");
    super::push_date_range(&mut qb, "created_at", dates);
    qb.push(" ORDER BY created_at ASC, id ASC");

    let rows = qb.build().fetch_all(pool).await?;
    rows.iter().map(ImprovementIdea::from_row).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &IdeaFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(category) = &filter.category {
        qb.push(" AND category = ").push_bind(category.clone());
    }
    if let Some(department_id) = filter.department_id {
        qb.push(" AND department_id = ").push_bind(department_id);
    }
    if let Some(submitted_by) = filter.submitted_by {
        qb.push(" AND submitted_by = ").push_bind(submitted_by);
    }
    super::push_search(qb, &["title"], filter.search.as_deref());
    super::push_date_range(qb, "created_at", &filter.created);
}

/// Insert a new idea in `submitted` status; returns its id
pub async fn insert(conn: &mut SqliteConnection, idea: &NewIdea, submitted_by: i64) -> Result<i64> {
    let number = next_number(&mut *conn, "improvement_ideas", "idea_number", "IDEA").await?;
    let now = qms_common::time::now();

    let id = sqlx::query(
        r#"
        INSERT INTO improvement_ideas (
            idea_number, title, description, category, expected_benefits, estimated_cost,
            estimated_benefit, department_id, submitted_by, responsible_user, status,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&number)
    .bind(idea.title.trim())
    .bind(&idea.description)
    .bind(&idea.category)
    .bind(&idea.expected_benefits)
    .bind(idea.estimated_cost)
    .bind(idea.estimated_benefit)
    .bind(idea.department_id)
    .bind(submitted_by)
    .bind(idea.responsible_user)
    .bind(IdeaStatus::Submitted.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Persist every mutable column of `idea`
///
/// With `expected_status` set, the row is only written while it still has
/// that status. Returns whether a row was updated.
pub async fn update<'e, E>(
    executor: E,
    idea: &ImprovementIdea,
    expected_status: Option<IdeaStatus>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expected = expected_status.map(|s| s.as_str());
    let result = sqlx::query(
        r#"
        UPDATE improvement_ideas SET
            title = ?, description = ?, category = ?, expected_benefits = ?,
            estimated_cost = ?, estimated_benefit = ?, department_id = ?,
            responsible_user = ?, status = ?, review_comments = ?, reviewed_by = ?,
            reviewed_date = ?, implementation_notes = ?, updated_at = ?
        WHERE id = ? AND (? IS NULL OR status = ?)
        "#,
    )
    .bind(&idea.title)
    .bind(&idea.description)
    .bind(&idea.category)
    .bind(&idea.expected_benefits)
    .bind(idea.estimated_cost)
    .bind(idea.estimated_benefit)
    .bind(idea.department_id)
    .bind(idea.responsible_user)
    .bind(idea.status.as_str())
    .bind(&idea.review_comments)
    .bind(idea.reviewed_by)
    .bind(idea.reviewed_date)
    .bind(&idea.implementation_notes)
    .bind(qms_common::time::now())
    .bind(idea.id)
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
    let result = sqlx::query("DELETE FROM improvement_ideas WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Totals per status (every status present) and per category
pub async fn statistics(pool: &SqlitePool) -> Result<IdeaStatistics> {
    let mut by_status: BTreeMap<String, i64> = IdeaStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM improvement_ideas GROUP BY status")
        .fetch_all(pool)
        .await?;
    let mut total = 0;
    for row in &rows {
        let n: i64 = row.try_get("n")?;
        total += n;
        by_status.insert(row.try_get("status")?, n);
    }

    let rows = sqlx::query(
        r#"
        SELECT COALESCE(NULLIF(category, ''), 'uncategorized') AS category, COUNT(*) AS n
        FROM improvement_ideas
        GROUP BY 1
        "#,
    )
    .fetch_all(pool)
    .await?;
    let mut by_category: BTreeMap<String, i64> = BTreeMap::new();
    for row in &rows {
        by_category.insert(row.try_get("category")?, row.try_get("n")?);
    }

    Ok(IdeaStatistics {
        total,
        by_status,
        by_category,
    })
}
