//! Implementation task persistence

use chrono::{DateTime, NaiveDate, Utc};
use qms_common::query::{Page, PageRequest, Sort, SortField};
use qms_common::status::TaskStatus;
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

/// Task belonging to exactly one improvement idea
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationTask {
    pub id: i64,
    pub improvement_idea_id: i64,
    pub idea_title: Option<String>,
    pub task_name: String,
    pub description: Option<String>,
    pub assigned_to: Option<i64>,
    pub assigned_to_name: Option<String>,
    pub status: TaskStatus,
    pub progress_percentage: i64,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub completed_date: Option<DateTime<Utc>>,
    pub completion_evidence: Option<String>,
    pub created_by: i64,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub improvement_idea_id: i64,
    pub task_name: String,
    pub description: Option<String>,
    pub assigned_to: Option<i64>,
    pub status: Option<TaskStatus>,
    pub progress_percentage: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskChanges {
    pub task_name: Option<String>,
    pub description: Option<String>,
    pub assigned_to: Option<i64>,
    pub status: Option<TaskStatus>,
    pub progress_percentage: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

fn check_progress(progress: i64) -> Result<()> {
    if (0..=100).contains(&progress) {
        Ok(())
    } else {
        Err(Error::InvalidInput(
            "Progress percentage must be between 0 and 100".to_string(),
        ))
    }
}

fn check_status(status: TaskStatus) -> Result<()> {
    if status == TaskStatus::Completed {
        return Err(Error::InvalidInput(
            "Use the complete action to mark a task as completed".to_string(),
        ));
    }
    Ok(())
}

fn check_dates(start: Option<NaiveDate>, due: Option<NaiveDate>) -> Result<()> {
    if let (Some(start), Some(due)) = (start, due) {
        if due < start {
            return Err(Error::InvalidInput(
                "Due date must not be before start date".to_string(),
            ));
        }
    }
    Ok(())
}

impl NewTask {
    pub fn validate(&self) -> Result<()> {
        if self.task_name.trim().is_empty() {
            return Err(Error::InvalidInput("Task name is required".to_string()));
        }
        if let Some(progress) = self.progress_percentage {
            check_progress(progress)?;
        }
        if let Some(status) = self.status {
            check_status(status)?;
        }
        check_dates(self.start_date, self.due_date)
    }
}

impl ImplementationTask {
    pub fn apply_changes(&mut self, changes: TaskChanges) -> Result<()> {
        if let Some(name) = changes.task_name {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput("Task name is required".to_string()));
            }
            self.task_name = name;
        }
        if let Some(progress) = changes.progress_percentage {
            check_progress(progress)?;
            self.progress_percentage = progress;
        }
        if let Some(status) = changes.status {
            check_status(status)?;
            self.status = status;
        }
        if changes.description.is_some() {
            self.description = changes.description;
        }
        if changes.assigned_to.is_some() {
            self.assigned_to = changes.assigned_to;
        }
        if changes.start_date.is_some() {
            self.start_date = changes.start_date;
        }
        if changes.due_date.is_some() {
            self.due_date = changes.due_date;
        }
        check_dates(self.start_date, self.due_date)
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            improvement_idea_id: row.try_get("improvement_idea_id")?,
            idea_title: row.try_get("idea_title")?,
            task_name: row.try_get("task_name")?,
            description: row.try_get("description")?,
            assigned_to: row.try_get("assigned_to")?,
            assigned_to_name: row.try_get("assigned_to_name")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            progress_percentage: row.try_get("progress_percentage")?,
            start_date: row.try_get("start_date")?,
            due_date: row.try_get("due_date")?,
            completed_date: row.try_get("completed_date")?,
            completion_evidence: row.try_get("completion_evidence")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct TaskFilter {
    pub improvement_idea_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<i64>,
}

qms_common::string_enum! {
    pub enum TaskSort("sort field") {
        CreatedAt => "createdAt",
        DueDate => "dueDate",
        TaskName => "taskName",
        Status => "status",
        ProgressPercentage => "progressPercentage",
    }
}

impl SortField for TaskSort {
    fn column(&self) -> &'static str {
        match self {
            TaskSort::CreatedAt => "created_at",
            TaskSort::DueDate => "due_date",
            TaskSort::TaskName => "task_name",
            TaskSort::Status => "status",
            TaskSort::ProgressPercentage => "progress_percentage",
        }
    }
}

/// Per-idea task counts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatistics {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub blocked: i64,
    pub cancelled: i64,
    pub avg_progress: f64,
}

const SELECT_TASKS: &str = r#"
    SELECT implementation_tasks.*,
        (SELECT i.title FROM improvement_ideas i
            WHERE i.id = implementation_tasks.improvement_idea_id) AS idea_title,
        (SELECT u.full_name FROM users u WHERE u.id = implementation_tasks.assigned_to) AS assigned_to_name
    FROM implementation_tasks
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<ImplementationTask>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_TASKS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(ImplementationTask::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &TaskFilter,
    sort: &Sort<TaskSort>,
    page: PageRequest,
) -> Result<Page<ImplementationTask>> {
    super::fetch_page(
        pool,
        "implementation_tasks",
        SELECT_TASKS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        ImplementationTask::from_row,
    )
    .await
}

/// Every task of an idea, oldest first
pub async fn find_by_idea(pool: &SqlitePool, improvement_idea_id: i64) -> Result<Vec<ImplementationTask>> {
    let sql = format!(
        "{} WHERE improvement_idea_id = ? ORDER BY created_at ASC, id ASC",
        SELECT_TASKS
    );
    let rows = sqlx::query(&sql)
        .bind(improvement_idea_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(ImplementationTask::from_row).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TaskFilter) {
    if let Some(idea_id) = filter.improvement_idea_id {
        qb.push(" AND improvement_idea_id = ").push_bind(idea_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(assigned_to) = filter.assigned_to {
        qb.push(" AND assigned_to = ").push_bind(assigned_to);
    }
}

pub async fn insert<'e, E>(executor: E, task: &NewTask, created_by: i64) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = qms_common::time::now();
    let id = sqlx::query(
        r#"
        INSERT INTO implementation_tasks (
            improvement_idea_id, task_name, description, assigned_to, status,
            progress_percentage, start_date, due_date, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.improvement_idea_id)
    .bind(task.task_name.trim())
    .bind(&task.description)
    .bind(task.assigned_to)
    .bind(task.status.unwrap_or(TaskStatus::Pending).as_str())
    .bind(task.progress_percentage.unwrap_or(0))
    .bind(task.start_date)
    .bind(task.due_date)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Persist every mutable column; guarded on `expected_status` when given
pub async fn update<'e, E>(
    executor: E,
    task: &ImplementationTask,
    expected_status: Option<TaskStatus>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let expected = expected_status.map(|s| s.as_str());
    let result = sqlx::query(
        r#"
        UPDATE implementation_tasks SET
            task_name = ?, description = ?, assigned_to = ?, status = ?,
            progress_percentage = ?, start_date = ?, due_date = ?, completed_date = ?,
            completion_evidence = ?, updated_by = ?, updated_at = ?
        WHERE id = ? AND (? IS NULL OR status = ?)
        "#,
    )
    .bind(&task.task_name)
    .bind(&task.description)
    .bind(task.assigned_to)
    .bind(task.status.as_str())
    .bind(task.progress_percentage)
    .bind(task.start_date)
    .bind(task.due_date)
    .bind(task.completed_date)
    .bind(&task.completion_evidence)
    .bind(task.updated_by)
    .bind(qms_common::time::now())
    .bind(task.id)
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
    let result = sqlx::query("DELETE FROM implementation_tasks WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn statistics(pool: &SqlitePool, improvement_idea_id: i64) -> Result<TaskStatistics> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
            COALESCE(SUM(CASE WHEN status = 'in_progress' THEN 1 ELSE 0 END), 0) AS in_progress,
            COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
            COALESCE(SUM(CASE WHEN status = 'blocked' THEN 1 ELSE 0 END), 0) AS blocked,
            COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0) AS cancelled,
            COALESCE(AVG(CAST(progress_percentage AS REAL)), 0.0) AS avg_progress
        FROM implementation_tasks
        WHERE improvement_idea_id = ?
        "#,
    )
    .bind(improvement_idea_id)
    .fetch_one(pool)
    .await?;

    Ok(TaskStatistics {
        total: row.try_get("total")?,
        pending: row.try_get("pending")?,
        in_progress: row.try_get("in_progress")?,
        completed: row.try_get("completed")?,
        blocked: row.try_get("blocked")?,
        cancelled: row.try_get("cancelled")?,
        avg_progress: row.try_get("avg_progress")?,
    })
}
