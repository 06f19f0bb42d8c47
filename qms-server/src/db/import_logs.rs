//! Data import result log
//!
//! Rows are append-only: an import is recorded once, after it has run.

use chrono::{DateTime, Utc};
use qms_common::query::{Page, PageRequest, Sort, SortField};
use qms_common::status::ImportStatus;
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

/// One rejected row of an import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    pub row: Option<i64>,
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataImportLog {
    pub id: i64,
    pub entity_type: String,
    pub file_name: String,
    pub total_rows: i64,
    pub success_rows: i64,
    pub failed_rows: i64,
    pub status: ImportStatus,
    pub errors: Vec<ImportRowError>,
    pub imported_by: i64,
    pub imported_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewImportLog {
    pub entity_type: String,
    pub file_name: String,
    pub total_rows: i64,
    pub success_rows: i64,
    pub failed_rows: i64,
    #[serde(default)]
    pub errors: Vec<ImportRowError>,
}

impl NewImportLog {
    pub fn validate(&self) -> Result<()> {
        if self.entity_type.trim().is_empty() {
            return Err(Error::InvalidInput("Entity type is required".to_string()));
        }
        if self.file_name.trim().is_empty() {
            return Err(Error::InvalidInput("File name is required".to_string()));
        }
        if self.total_rows < 0 || self.success_rows < 0 || self.failed_rows < 0 {
            return Err(Error::InvalidInput("Row counts must not be negative".to_string()));
        }
        match self.success_rows.checked_add(self.failed_rows) {
            Some(processed) if processed <= self.total_rows => Ok(()),
            Some(processed) => Err(Error::InvalidInput(format!(
                "successRows + failedRows ({}) exceeds totalRows ({})",
                processed, self.total_rows
            ))),
            None => Err(Error::InvalidInput(format!(
                "successRows + failedRows exceeds totalRows ({})",
                self.total_rows
            ))),
        }
    }

    pub fn status(&self) -> ImportStatus {
        ImportStatus::from_counts(self.success_rows, self.failed_rows)
    }
}

impl DataImportLog {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let errors: String = row.try_get("errors")?;
        Ok(Self {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            file_name: row.try_get("file_name")?,
            total_rows: row.try_get("total_rows")?,
            success_rows: row.try_get("success_rows")?,
            failed_rows: row.try_get("failed_rows")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            errors: serde_json::from_str(&errors)?,
            imported_by: row.try_get("imported_by")?,
            imported_by_name: row.try_get("imported_by_name")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Default)]
pub struct ImportLogFilter {
    pub entity_type: Option<String>,
    pub status: Option<ImportStatus>,
}

qms_common::string_enum! {
    pub enum ImportLogSort("sort field") {
        CreatedAt => "createdAt",
        EntityType => "entityType",
        Status => "status",
    }
}

impl SortField for ImportLogSort {
    fn column(&self) -> &'static str {
        match self {
            ImportLogSort::CreatedAt => "created_at",
            ImportLogSort::EntityType => "entity_type",
            ImportLogSort::Status => "status",
        }
    }
}

const SELECT_IMPORT_LOGS: &str = r#"
    SELECT data_import_logs.*,
        (SELECT u.full_name FROM users u WHERE u.id = data_import_logs.imported_by) AS imported_by_name
    FROM data_import_logs
"#;

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<DataImportLog>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_IMPORT_LOGS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(DataImportLog::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &ImportLogFilter,
    sort: &Sort<ImportLogSort>,
    page: PageRequest,
) -> Result<Page<DataImportLog>> {
    super::fetch_page(
        pool,
        "data_import_logs",
        SELECT_IMPORT_LOGS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        DataImportLog::from_row,
    )
    .await
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ImportLogFilter) {
    if let Some(entity_type) = &filter.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

pub async fn insert<'e, E>(executor: E, log: &NewImportLog, imported_by: i64) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id = sqlx::query(
        r#"
        INSERT INTO data_import_logs (entity_type, file_name, total_rows, success_rows,
                                      failed_rows, status, errors, imported_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(log.entity_type.trim())
    .bind(log.file_name.trim())
    .bind(log.total_rows)
    .bind(log.success_rows)
    .bind(log.failed_rows)
    .bind(log.status().as_str())
    .bind(serde_json::to_string(&log.errors)?)
    .bind(imported_by)
    .bind(qms_common::time::now())
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(total: i64, success: i64, failed: i64) -> NewImportLog {
        NewImportLog {
            entity_type: "ncr".to_string(),
            file_name: "ncrs.csv".to_string(),
            total_rows: total,
            success_rows: success,
            failed_rows: failed,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_counts_must_fit_total() {
        assert!(log(10, 7, 3).validate().is_ok());
        assert!(log(10, 8, 3).validate().is_err());
        assert!(log(10, -1, 0).validate().is_err());
    }

    #[test]
    fn test_huge_counts_are_rejected() {
        let err = log(10, i64::MAX, 1).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid input: successRows + failedRows exceeds totalRows (10)"
        );
        assert!(log(i64::MAX, i64::MAX, i64::MAX).validate().is_err());
    }

    #[test]
    fn test_status_follows_counts() {
        assert_eq!(log(5, 5, 0).status(), ImportStatus::Completed);
        assert_eq!(log(5, 0, 5).status(), ImportStatus::Failed);
        assert_eq!(log(5, 3, 2).status(), ImportStatus::Partial);
    }
}
