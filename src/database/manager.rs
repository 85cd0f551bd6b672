use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the database layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Single-connection pools for the administrative procedures.
///
/// Every procedure opens exactly one connection, issues its statements one
/// at a time and closes the pool when it is done. Nothing is cached between
/// invocations.
pub struct DatabaseManager;

impl DatabaseManager {
    /// Open a one-connection pool against `database_url`
    pub async fn connect(database_url: &str) -> Result<PgPool, DatabaseError> {
        let timeout = crate::config::config().database.connect_timeout_secs;
        Self::connect_with_timeout(database_url, Duration::from_secs(timeout)).await
    }

    pub async fn connect_with_timeout(
        database_url: &str,
        acquire_timeout: Duration,
    ) -> Result<PgPool, DatabaseError> {
        let url = normalize_database_url(database_url);
        debug!("Connecting to {}", redact_database_url(&url));

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect(&url)
            .await?;

        info!("Connected to {}", redact_database_url(&url));
        Ok(pool)
    }

    pub async fn close(pool: PgPool) {
        pool.close().await;
        debug!("Closed database pool");
    }

    /// Connects, runs `SELECT 1` and disconnects
    pub async fn health_check(database_url: &str) -> Result<(), DatabaseError> {
        let pool = Self::connect(database_url).await?;
        let result = sqlx::query("SELECT 1").execute(&pool).await;
        Self::close(pool).await;
        result?;
        Ok(())
    }
}

/// Rewrite the managed provider's `neon://` scheme to `postgresql://`
pub fn normalize_database_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_prefix("neon://") {
        Some(rest) => format!("postgresql://{}", rest),
        None => trimmed.to_string(),
    }
}

/// Strip the password so connection targets can be logged
pub fn redact_database_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}

/// Quote SQL identifier to prevent injection
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}
