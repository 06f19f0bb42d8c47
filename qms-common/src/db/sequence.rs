//! Human-readable record numbers (`IDEA-0001`, `NCR-0042`, ...)

use crate::Result;
use sqlx::SqliteConnection;

/// Format a record number with a zero-padded sequence
///
/// ```
/// use qms_common::db::sequence::format_number;
///
/// assert_eq!(format_number("IDEA", 1), "IDEA-0001");
/// assert_eq!(format_number("NCR", 12345), "NCR-12345");
/// ```
pub fn format_number(prefix: &str, sequence: i64) -> String {
    format!("{}-{:04}", prefix, sequence)
}

/// Next free number for `prefix` in `table.column`
///
/// Call inside the transaction that inserts the row so two concurrent
/// creates cannot observe the same maximum. `table` and `column` are
/// compile-time identifiers, never request input.
pub async fn next_number(
    conn: &mut SqliteConnection,
    table: &'static str,
    column: &'static str,
    prefix: &str,
) -> Result<String> {
    let sql = format!(
        "SELECT MAX(CAST(SUBSTR({column}, ?) AS INTEGER)) FROM {table} WHERE {column} LIKE ?",
        column = column,
        table = table
    );

    // SUBSTR is 1-indexed; skip "<prefix>-"
    let digits_start = prefix.len() as i64 + 2;
    let max: Option<i64> = sqlx::query_scalar(&sql)
        .bind(digits_start)
        .bind(format!("{}-%", prefix))
        .fetch_one(&mut *conn)
        .await?;

    Ok(format_number(prefix, max.unwrap_or(0) + 1))
}
