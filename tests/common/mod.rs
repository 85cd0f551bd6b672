#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use tenant_guard::database::DatabaseError;
use tenant_guard::handlers::{self, AppState};
use tenant_guard::migrate::{MigrationConnector, MigrationTarget};

pub const SECRET: &str = "s3cret";

/// Counts connects and hands out in-memory sessions
#[derive(Default)]
pub struct SpyConnector {
    pub connects: AtomicUsize,
    pub fail_marker: Option<&'static str>,
}

impl SpyConnector {
    pub fn failing_sql(marker: &'static str) -> Self {
        Self {
            connects: AtomicUsize::new(0),
            fail_marker: Some(marker),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MigrationConnector for SpyConnector {
    async fn connect(&self, _database_url: &str) -> Result<Box<dyn MigrationTarget>, DatabaseError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTarget {
            fail_marker: self.fail_marker,
        }))
    }
}

/// Every statement succeeds with one row unless it contains the marker
pub struct MemoryTarget {
    fail_marker: Option<&'static str>,
}

impl MemoryTarget {
    fn check(&self, sql: &str) -> Result<(), DatabaseError> {
        match self.fail_marker {
            Some(marker) if sql.contains(marker) => {
                Err(sqlx::Error::Protocol(format!("relation {} does not exist", marker)).into())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MigrationTarget for MemoryTarget {
    async fn execute_backfill(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        self.check(sql)?;
        Ok(1)
    }

    async fn apply_migration(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.check(sql)
    }

    async fn count_null_tenant_rows(&mut self, _table: &str) -> Result<i64, DatabaseError> {
        Ok(0)
    }

    async fn close(self: Box<Self>) {}
}

pub fn state(connector: Arc<SpyConnector>, migrations_root: PathBuf) -> AppState {
    AppState {
        migrate_secret: Some(SECRET.to_string()),
        database_url: Some("postgresql://app@localhost/app".to_string()),
        migrations_root,
        connector,
    }
}

pub fn app(state: AppState) -> Router {
    handlers::router(state)
}

/// POST to the trigger, optionally with a secret header; returns status and JSON body
pub async fn trigger(app: Router, path: &str, secret: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method("POST").uri(path);
    if let Some(secret) = secret {
        request = request.header("x-migrate-secret", secret);
    }
    let response = app
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Live database for the RLS tests, if one was provided
pub fn live_database_url() -> Option<String> {
    let url = std::env::var("TEST_DATABASE_URL").ok().filter(|url| !url.is_empty());
    if url.is_none() {
        eprintln!("TEST_DATABASE_URL not set; skipping live database test");
    }
    url
}
