//! Shared harness for qms-server integration tests
//!
//! Each test gets its own file-backed database in a temporary folder, one
//! user per built-in role, and a router it drives with `oneshot`.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;

use qms_server::db::users::{self, NewUser};
use qms_server::{build_router, AppState};

/// A test user: database id plus plain API token
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: i64,
    pub token: String,
}

pub struct TestApp {
    // Dropped last; holds the database and backups
    _dir: TempDir,
    pub pool: SqlitePool,
    pub backup_dir: PathBuf,
    router: Router,
    users: HashMap<&'static str, TestUser>,
}

/// Role names with a matching test user of the same username
pub const ROLES: &[&str] = &["admin", "manager", "auditor", "user", "viewer"];

impl TestApp {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let pool = qms_common::db::init_database(&dir.path().join("qms.db"))
            .await
            .expect("init database");

        let mut users_by_role = HashMap::new();
        let superuser_token = users::ensure_bootstrap_admin(&pool)
            .await
            .expect("bootstrap admin")
            .expect("fresh database creates admin");
        users_by_role.insert(
            "superuser",
            TestUser {
                id: 1,
                token: superuser_token,
            },
        );

        for role in ROLES {
            let user = create_user(&pool, &format!("{}_user", role), &[role]).await;
            users_by_role.insert(*role, user);
        }

        let backup_dir = dir.path().join("backups");
        let router = build_router(AppState::new(pool.clone(), backup_dir.clone()));

        Self {
            _dir: dir,
            pool,
            backup_dir,
            router,
            users: users_by_role,
        }
    }

    /// Test user holding `role` ("superuser", "admin", "manager", ...)
    pub fn user(&self, role: &str) -> &TestUser {
        self.users
            .get(role)
            .unwrap_or_else(|| panic!("no test user for role {}", role))
    }

    pub fn token(&self, role: &str) -> &str {
        &self.user(role).token
    }

    /// Run a prebuilt request through the router
    pub async fn oneshot(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send a request and return the raw response
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.oneshot(request).await
    }

    /// Send a request as `role` and decode the JSON body (`Null` when empty)
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        role: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.send(method, path, Some(self.token(role)), body).await;
        json_response(response).await
    }

    pub async fn get(&self, path: &str, role: &str) -> (StatusCode, Value) {
        self.call(Method::GET, path, role, None).await
    }

    pub async fn post(&self, path: &str, role: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, path, role, Some(body)).await
    }

    pub async fn put(&self, path: &str, role: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, path, role, Some(body)).await
    }

    pub async fn delete(&self, path: &str, role: &str) -> (StatusCode, Value) {
        self.call(Method::DELETE, path, role, None).await
    }

    /// POST expecting `201 Created`; returns the new id
    pub async fn create(&self, path: &str, role: &str, body: Value) -> i64 {
        let (status, json) = self.post(path, role, body).await;
        assert_eq!(status, StatusCode::CREATED, "POST {} failed: {}", path, json);
        json["id"].as_i64().expect("created id")
    }
}

/// Insert an active user with the given roles
pub async fn create_user(pool: &SqlitePool, username: &str, roles: &[&str]) -> TestUser {
    let new_user = NewUser {
        username: username.to_string(),
        email: Some(format!("{}@example.com", username)),
        full_name: format!("Test {}", username),
        department_id: None,
        roles: roles.iter().map(|r| r.to_string()).collect(),
    };

    let mut conn = pool.acquire().await.unwrap();
    let (id, token) = users::insert(&mut conn, &new_user).await.unwrap();
    users::set_roles(&mut conn, id, &new_user.roles).await.unwrap();
    TestUser { id, token }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn json_response(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body_bytes(response).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            panic!("invalid JSON ({}): {}", e, String::from_utf8_lossy(&bytes))
        })
    };
    (status, json)
}

/// Error message from a `{"error": {"code", "message"}}` body
pub fn error_message(json: &Value) -> &str {
    json["error"]["message"].as_str().unwrap_or_default()
}
