//! Users, role assignments and API token lookup

use chrono::{DateTime, Utc};
use qms_common::auth::{generate_token, hash_token, level, Caller, SUPERUSER_ROLE};
use qms_common::query::{Page, PageRequest, Sort, SortField};
use qms_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::info;

/// User record; the token hash is never loaded into it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub full_name: String,
    pub department_id: Option<i64>,
    pub active: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub full_name: String,
    pub department_id: Option<i64>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub department_id: Option<i64>,
    pub include_inactive: bool,
}

qms_common::string_enum! {
    pub enum UserSort("sort field") {
        Username => "username",
        FullName => "fullName",
        CreatedAt => "createdAt",
    }
}

impl SortField for UserSort {
    fn column(&self) -> &'static str {
        match self {
            UserSort::Username => "username",
            UserSort::FullName => "full_name",
            UserSort::CreatedAt => "created_at",
        }
    }
}

const SELECT_USERS: &str = r#"
    SELECT id, username, email, full_name, department_id, active, created_at, updated_at,
        (SELECT group_concat(r.name, ',') FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = users.id) AS role_names
    FROM users
"#;

impl User {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let role_names: Option<String> = row.try_get("role_names")?;
        let mut roles: Vec<String> = role_names
            .map(|names| names.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        roles.sort();

        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            full_name: row.try_get("full_name")?,
            department_id: row.try_get("department_id")?,
            active: row.try_get("active")?,
            roles,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Resolve an active user's identity from a token hash
pub async fn find_caller_by_token_hash(pool: &SqlitePool, token_hash: &str) -> Result<Option<Caller>> {
    let row = sqlx::query("SELECT id, username FROM users WHERE api_token_hash = ? AND active = 1")
        .bind(token_hash)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let user_id: i64 = row.try_get("id")?;

    let role_rows = sqlx::query(
        r#"
        SELECT r.name, r.level FROM roles r
        JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = ?
        ORDER BY r.level DESC, r.name
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut roles = Vec::with_capacity(role_rows.len());
    let mut caller_level = level::VIEWER;
    for (i, role) in role_rows.iter().enumerate() {
        let role_level: i64 = role.try_get("level")?;
        if i == 0 {
            caller_level = role_level;
        }
        roles.push(role.try_get("name")?);
    }

    Ok(Some(Caller {
        user_id,
        username: row.try_get("username")?,
        roles,
        level: caller_level,
    }))
}

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE id = ?", SELECT_USERS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(executor).await?;
    row.as_ref().map(User::from_row).transpose()
}

pub async fn find_all(
    pool: &SqlitePool,
    filter: &UserFilter,
    sort: &Sort<UserSort>,
    page: PageRequest,
) -> Result<Page<User>> {
    super::fetch_page(
        pool,
        "users",
        SELECT_USERS,
        |qb| push_filters(qb, filter),
        sort.order_by_clause(),
        page,
        User::from_row,
    )
    .await
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    if !filter.include_inactive {
        qb.push(" AND active = 1");
    }
    if let Some(department_id) = filter.department_id {
        qb.push(" AND department_id = ").push_bind(department_id);
    }
    super::push_search(qb, &["username", "full_name"], filter.search.as_deref());
}

/// Insert a user and return `(id, plain token)`
///
/// The plain token is only ever available from this call.
pub async fn insert(conn: &mut SqliteConnection, user: &NewUser) -> Result<(i64, String)> {
    let token = generate_token();
    let now = qms_common::time::now();

    let id = sqlx::query(
        r#"
        INSERT INTO users (username, email, full_name, department_id, active, api_token_hash,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, 1, ?, ?, ?)
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.full_name)
    .bind(user.department_id)
    .bind(hash_token(&token))
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok((id, token))
}

/// Replace a user's roles by role name
///
/// Fails with `NotFound` naming the first unknown role.
pub async fn set_roles(conn: &mut SqliteConnection, user_id: i64, role_names: &[String]) -> Result<()> {
    let mut role_ids = Vec::with_capacity(role_names.len());
    for name in role_names {
        let role_id: Option<i64> = sqlx::query_scalar("SELECT id FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        match role_id {
            Some(id) => role_ids.push(id),
            None => return Err(Error::NotFound(format!("Role '{}' not found", name))),
        }
    }

    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    for role_id in role_ids {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(role_id)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query("UPDATE users SET updated_at = ? WHERE id = ?")
        .bind(qms_common::time::now())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn username_exists<'e, E>(executor: E, username: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ?")
        .bind(username)
        .fetch_one(executor)
        .await?;
    Ok(count > 0)
}

/// Create the `admin` superuser when the users table is empty
///
/// Returns the new plain token so the caller can print it once.
pub async fn ensure_bootstrap_admin(pool: &SqlitePool) -> Result<Option<String>> {
    let mut tx = pool.begin().await?;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&mut *tx)
        .await?;
    if count > 0 {
        return Ok(None);
    }

    let admin = NewUser {
        username: "admin".to_string(),
        email: None,
        full_name: "System Administrator".to_string(),
        department_id: None,
        roles: vec![SUPERUSER_ROLE.to_string()],
    };
    let (id, token) = insert(&mut *tx, &admin).await?;
    set_roles(&mut *tx, id, &admin.roles).await?;
    tx.commit().await?;

    info!("Created bootstrap user 'admin' (id {})", id);
    Ok(Some(token))
}
