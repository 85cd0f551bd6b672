use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

use crate::database::normalize_database_url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL/NETLIFY_DATABASE_URL not set. Provide a connection string before running.")]
    MissingDatabaseUrl,

    #[error("MIGRATE_SECRET not configured in environment")]
    MissingMigrateSecret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub rls: RlsDefaults,
    pub migrate: MigrateConfig,
    pub report: ReportConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Already normalized (`neon://` rewritten), `None` when neither variable is set
    pub url: Option<String>,
    /// Same variables in the opposite order: the migration trigger prefers `DATABASE_URL`
    pub trigger_url: Option<String>,
    pub connect_timeout_secs: u64,
}

/// Defaults used by the policy applier when the caller leaves a knob unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlsDefaults {
    pub allow_null_tenant: bool,
    pub force_rls: bool,
    pub schema: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateConfig {
    pub secret: Option<String>,
    pub root: PathBuf,
}

/// Coverage report target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub schema: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub log_filter: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database
        self.database.url = resolve_database_url();
        self.database.trigger_url = resolve_trigger_database_url();
        if let Ok(v) = env::var("DATABASE_CONNECT_TIMEOUT_SECS") {
            self.database.connect_timeout_secs = v.parse().unwrap_or(self.database.connect_timeout_secs);
        }

        // RLS applier defaults
        self.rls.allow_null_tenant = allow_null_tenant_flag(env::var("RLS_ALLOW_NULL_TENANT").ok().as_deref());
        self.rls.force_rls = force_rls_flag(env::var("FORCE_RLS").ok().as_deref());
        self.rls.schema = non_empty_var("RLS_SCHEMA");

        // Migration trigger
        self.migrate.secret = non_empty_var("MIGRATE_SECRET");
        if let Some(root) = non_empty_var("MIGRATIONS_ROOT") {
            self.migrate.root = PathBuf::from(root);
        }

        // Coverage report
        if let Some(schema) = non_empty_var("POSTGRES_SCHEMA") {
            self.report.schema = schema.replace('"', "");
        }

        // Server
        if let Some(port) = non_empty_var("TENANT_GUARD_PORT").or_else(|| non_empty_var("PORT")) {
            self.server.port = port.parse().unwrap_or(self.server.port);
        }
        if let Some(filter) = non_empty_var("RUST_LOG") {
            self.server.log_filter = filter;
        }

        self
    }

    /// Connection string or a configuration error, checked before any I/O
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database.url.as_deref().ok_or(ConfigError::MissingDatabaseUrl)
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                trigger_url: None,
                connect_timeout_secs: 30,
            },
            rls: RlsDefaults::default(),
            migrate: MigrateConfig::default(),
            report: ReportConfig::default(),
            server: ServerConfig {
                port: 3000,
                log_filter: "tenant_guard=debug,tower_http=debug,info".to_string(),
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                trigger_url: None,
                connect_timeout_secs: 10,
            },
            rls: RlsDefaults::default(),
            migrate: MigrateConfig::default(),
            report: ReportConfig::default(),
            server: ServerConfig {
                port: 3000,
                log_filter: "info".to_string(),
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                trigger_url: None,
                connect_timeout_secs: 5,
            },
            rls: RlsDefaults::default(),
            migrate: MigrateConfig::default(),
            report: ReportConfig::default(),
            server: ServerConfig {
                port: 3000,
                log_filter: "info".to_string(),
            },
        }
    }
}

impl Default for RlsDefaults {
    fn default() -> Self {
        Self {
            allow_null_tenant: true,
            force_rls: false,
            schema: None,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
        }
    }
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            secret: None,
            root: PathBuf::from("."),
        }
    }
}

/// `NETLIFY_DATABASE_URL` wins over `DATABASE_URL`; empty values count as unset
pub fn resolve_database_url() -> Option<String> {
    first_database_url([non_empty_var("NETLIFY_DATABASE_URL"), non_empty_var("DATABASE_URL")])
}

/// `DATABASE_URL` wins over `NETLIFY_DATABASE_URL`
pub fn resolve_trigger_database_url() -> Option<String> {
    first_database_url([non_empty_var("DATABASE_URL"), non_empty_var("NETLIFY_DATABASE_URL")])
}

fn first_database_url<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .next()
        .map(|raw| normalize_database_url(&raw))
}

/// NULL tenants stay allowed unless the flag is exactly `false`
pub fn allow_null_tenant_flag(value: Option<&str>) -> bool {
    value != Some("false")
}

/// Forcing only happens when the flag is exactly `true`
pub fn force_rls_flag(value: Option<&str>) -> bool {
    value == Some("true")
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
