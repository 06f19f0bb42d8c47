//! Database backup and restore
//!
//! Backups are standalone SQLite files written with `VACUUM INTO`, so they
//! are consistent snapshots even while the server keeps running. A restore
//! copies every QMS table back from an attached backup file in a single
//! transaction; the live database file itself is never replaced.

use chrono::{DateTime, Utc};
use qms_common::db::QMS_TABLES;
use qms_common::{Error, Result};
use serde::Serialize;
use sqlx::{Connection, SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const FILE_PREFIX: &str = "qms-backup-";
const FILE_SUFFIX: &str = ".db";
const ATTACHED: &str = "qms_backup";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub file_name: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

/// Reject anything that is not a plain `*.db` name inside the backup folder
pub fn validate_file_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.ends_with(FILE_SUFFIX)
        && name.len() > FILE_SUFFIX.len()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..");
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid backup file name '{}'", name)))
    }
}

fn path_text(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::Internal(format!("Backup path is not valid UTF-8: {}", path.display())))
}

async fn existing_backup(dir: &Path, name: &str) -> Result<PathBuf> {
    validate_file_name(name)?;
    let path = dir.join(name);
    if !tokio::fs::try_exists(&path).await? {
        return Err(Error::NotFound(format!("Backup '{}' not found", name)));
    }
    Ok(path)
}

async fn describe(path: &Path) -> Result<BackupInfo> {
    let metadata = tokio::fs::metadata(path).await?;
    let modified: DateTime<Utc> = metadata.modified()?.into();
    Ok(BackupInfo {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size_bytes: metadata.len(),
        modified_at: modified,
    })
}

/// Snapshot the live database into `dir`
pub async fn create(pool: &SqlitePool, dir: &Path) -> Result<BackupInfo> {
    tokio::fs::create_dir_all(dir).await?;

    let stamp = qms_common::time::file_stamp(qms_common::time::now());
    let mut path = dir.join(format!("{}{}{}", FILE_PREFIX, stamp, FILE_SUFFIX));
    let mut attempt = 1;
    while tokio::fs::try_exists(&path).await? {
        attempt += 1;
        path = dir.join(format!("{}{}-{}{}", FILE_PREFIX, stamp, attempt, FILE_SUFFIX));
    }

    sqlx::query("VACUUM INTO ?")
        .bind(path_text(&path)?)
        .execute(pool)
        .await?;

    let backup = describe(&path).await?;
    info!("Created backup {} ({} bytes)", backup.file_name, backup.size_bytes);
    Ok(backup)
}

/// Backups in `dir`, newest first
pub async fn list(dir: &Path) -> Result<Vec<BackupInfo>> {
    if !tokio::fs::try_exists(dir).await? {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if validate_file_name(&name).is_err() || !entry.file_type().await?.is_file() {
            continue;
        }
        backups.push(describe(&entry.path()).await?);
    }

    backups.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| b.file_name.cmp(&a.file_name))
    });
    Ok(backups)
}

pub async fn delete(dir: &Path, name: &str) -> Result<()> {
    let path = existing_backup(dir, name).await?;
    tokio::fs::remove_file(&path).await?;
    info!("Deleted backup {}", name);
    Ok(())
}

/// Replace the contents of every QMS table with the backup's rows
///
/// Columns are matched by name, so a backup taken before a column was added
/// restores with that column at its default.
pub async fn restore(pool: &SqlitePool, dir: &Path, name: &str) -> Result<usize> {
    let path = existing_backup(dir, name).await?;
    let mut conn = pool.acquire().await?;

    // foreign_keys can only change outside a transaction
    sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
    let attached = sqlx::query(&format!("ATTACH DATABASE ? AS {}", ATTACHED))
        .bind(path_text(&path)?)
        .execute(&mut *conn)
        .await;

    let result = match attached {
        Ok(_) => copy_tables(&mut *conn).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = sqlx::query(&format!("DETACH DATABASE {}", ATTACHED))
        .execute(&mut *conn)
        .await
    {
        if result.is_ok() {
            warn!("Failed to detach backup {}: {}", name, e);
        }
    }
    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;

    let rows = result?;
    info!("Restored {} rows from backup {}", rows, name);
    Ok(rows)
}

async fn column_names(conn: &mut SqliteConnection, schema: &str, table: &str) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT name FROM pragma_table_info(?, ?)")
        .bind(table)
        .bind(schema)
        .fetch_all(&mut *conn)
        .await?;
    Ok(names)
}

async fn copy_tables(conn: &mut SqliteConnection) -> Result<usize> {
    let mut tx = conn.begin().await?;

    let backup_columns = column_names(&mut *tx, ATTACHED, "users").await?;
    if backup_columns.is_empty() {
        return Err(Error::InvalidInput(
            "File is not a QMS database backup".to_string(),
        ));
    }

    let mut restored = 0usize;
    for table in QMS_TABLES {
        let live = column_names(&mut *tx, "main", table).await?;
        let saved = column_names(&mut *tx, ATTACHED, table).await?;

        sqlx::query(&format!("DELETE FROM main.{}", table))
            .execute(&mut *tx)
            .await?;
        if saved.is_empty() {
            warn!("Backup has no {} table; leaving it empty", table);
            continue;
        }

        let columns: Vec<&str> = live
            .iter()
            .filter(|c| saved.contains(c))
            .map(String::as_str)
            .collect();
        let column_list = columns.join(", ");
        let copied = sqlx::query(&format!(
            "INSERT INTO main.{table} ({cols}) SELECT {cols} FROM {schema}.{table}",
            table = table,
            cols = column_list,
            schema = ATTACHED
        ))
        .execute(&mut *tx)
        .await?
        .rows_affected();
        restored += copied as usize;
    }

    tx.commit().await?;
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_validation() {
        assert!(validate_file_name("qms-backup-20260101T000000Z.db").is_ok());
        assert!(validate_file_name("manual.db").is_ok());
        for bad in ["", ".db", "../qms.db", "a/b.db", "a\\b.db", "backup.sqlite", ".hidden.db"] {
            assert!(validate_file_name(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let backups = list(&dir.path().join("nope")).await.unwrap();
        assert!(backups.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_backup_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = delete(dir.path(), "absent.db").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
