//! Database access, one module per table
//!
//! Every list query is a single-table `SELECT` with display names pulled in
//! through correlated subqueries, so filters and `ORDER BY` columns never
//! need a table qualifier.

pub mod audit_logs;
pub mod audits;
pub mod capas;
pub mod departments;
pub mod email_templates;
pub mod findings;
pub mod ideas;
pub mod import_logs;
pub mod ncrs;
pub mod processes;
pub mod roles;
pub mod skill_levels;
pub mod tasks;
pub mod users;

use qms_common::query::{DateRange, Page, PageRequest};
use qms_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

/// Run the `COUNT(*)` and `LIMIT/OFFSET` queries of a list request
///
/// `filters` is applied to both queries after `WHERE 1=1` and must only push
/// `AND ...` fragments with bound values.
pub(crate) async fn fetch_page<T>(
    pool: &SqlitePool,
    table: &'static str,
    select: &'static str,
    filters: impl Fn(&mut QueryBuilder<'_, Sqlite>),
    order_by: String,
    page: PageRequest,
    map: fn(&SqliteRow) -> Result<T>,
) -> Result<Page<T>> {
    let mut count = QueryBuilder::<Sqlite>::new(format!(
        "SELECT COUNT(*) FROM {} WHERE 1=1",
        table
    ));
    filters(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut query = QueryBuilder::<Sqlite>::new(select);
    query.push(" WHERE 1=1");
    filters(&mut query);
    query.push(order_by);
    query
        .push(" LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = query.build().fetch_all(pool).await?;
    let data = rows.iter().map(map).collect::<Result<Vec<_>>>()?;

    Ok(Page::new(data, total, page))
}

/// Append `AND <column> LIKE %term%` when a search term is present
pub(crate) fn push_search(qb: &mut QueryBuilder<'_, Sqlite>, columns: &[&str], term: Option<&str>) {
    let Some(term) = term else {
        return;
    };
    let pattern = format!("%{}%", term);
    qb.push(" AND (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(*column).push(" LIKE ").push_bind(pattern.clone());
    }
    qb.push(")");
}

/// Append an inclusive date window on a text date/timestamp column
pub(crate) fn push_date_range(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, dates: &DateRange) {
    if let Some(start) = dates.start_bound() {
        qb.push(" AND ").push(column).push(" >= ").push_bind(start);
    }
    if let Some(end) = dates.end_bound_exclusive() {
        qb.push(" AND ").push(column).push(" < ").push_bind(end);
    }
}
