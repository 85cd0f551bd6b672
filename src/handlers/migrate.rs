// handlers/migrate.rs - ANY /run-tenant-migrations handler

use axum::{extract::State, http::HeaderMap, response::Json};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::error::ApiError;
use crate::handlers::AppState;
use crate::migrate;

pub const SECRET_HEADER: &str = "x-migrate-secret";

/// Backfill tenant ids, then apply the NOT NULL migrations.
///
/// Checks the shared secret before anything touches the database. Individual
/// step failures still produce a 200 with the per-step report.
pub async fn run_tenant_migrations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let Some(secret) = state.migrate_secret.as_deref() else {
        return Err(ConfigError::MissingMigrateSecret.into());
    };

    let incoming = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if incoming != Some(secret) {
        warn!("Rejected migration trigger: missing or mismatched {}", SECRET_HEADER);
        return Err(ApiError::unauthorized("Unauthorized"));
    }

    let database_url = state
        .database_url
        .as_deref()
        .ok_or_else(|| ApiError::internal_server_error("DATABASE_URL not configured"))?;

    info!("Migration trigger accepted");
    let mut target = state.connector.connect(database_url).await?;
    let result = migrate::run_tenant_migrations(target.as_mut(), &state.migrations_root).await;
    target.close().await;

    Ok(Json(result?.to_json()))
}
