pub mod health;
pub mod migrate;

use axum::{
    routing::{any, get},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::migrate::{MigrationConnector, PgConnector};

/// Shared handler state, built once from configuration
#[derive(Clone)]
pub struct AppState {
    pub migrate_secret: Option<String>,
    pub database_url: Option<String>,
    pub migrations_root: PathBuf,
    pub connector: Arc<dyn MigrationConnector>,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            migrate_secret: config.migrate.secret.clone(),
            database_url: config.database.trigger_url.clone(),
            migrations_root: config.migrate.root.clone(),
            connector: Arc::new(PgConnector),
        }
    }
}

/// Path the trigger has historically been served from
pub const FUNCTION_PATH: &str = "/.netlify/functions/run-tenant-migrations";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/run-tenant-migrations", any(migrate::run_tenant_migrations))
        .route(FUNCTION_PATH, any(migrate::run_tenant_migrations))
        .with_state(state)
}
