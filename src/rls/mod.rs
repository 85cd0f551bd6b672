pub mod policy;

use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{AppConfig, ConfigError};
use crate::database::discovery::{discover_tenant_tables, TenantScopedTable};
use crate::database::manager::{DatabaseError, DatabaseManager};

pub use policy::{policy_statements, set_tenant_context, tenant_predicate, RlsPolicyConfig, POLICY_NAME, TENANT_SETTING};

#[derive(Debug, Error)]
pub enum RlsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Caller-facing knobs; anything left `None` falls back to the environment
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub database_url: Option<String>,
    pub allow_null_tenant: Option<bool>,
    pub force_rls: Option<bool>,
    pub verbose: Option<bool>,
    pub schema: Option<String>,
}

/// Options after environment fallbacks were applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSetup {
    pub database_url: String,
    pub config: RlsPolicyConfig,
    pub verbose: bool,
    pub schema: Option<String>,
}

impl SetupOptions {
    pub fn resolve(self, defaults: &AppConfig) -> Result<ResolvedSetup, ConfigError> {
        let database_url = match self.database_url {
            Some(url) if !url.trim().is_empty() => crate::database::normalize_database_url(&url),
            _ => defaults.require_database_url()?.to_string(),
        };

        Ok(ResolvedSetup {
            database_url,
            config: RlsPolicyConfig::new(
                self.allow_null_tenant.unwrap_or(defaults.rls.allow_null_tenant),
                self.force_rls.unwrap_or(defaults.rls.force_rls),
            ),
            verbose: self.verbose.unwrap_or(false),
            schema: self.schema.or_else(|| defaults.rls.schema.clone()),
        })
    }
}

/// What one applier run touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RlsSummary {
    pub tables: Vec<TenantScopedTable>,
    pub allow_null_tenant: bool,
    pub force_rls: bool,
}

/// Enable RLS and (re)create the isolation policy on every tenant table.
///
/// Opens its own connection and always closes it, whether or not the DDL
/// succeeded.
pub async fn setup_tenant_rls(options: SetupOptions) -> Result<RlsSummary, RlsError> {
    let resolved = options.resolve(crate::config::config())?;
    run_setup(&resolved).await
}

pub async fn run_setup(resolved: &ResolvedSetup) -> Result<RlsSummary, RlsError> {
    let pool = DatabaseManager::connect(&resolved.database_url).await?;
    let result = apply_tenant_policies(
        &pool,
        resolved.config,
        resolved.schema.as_deref(),
        resolved.verbose,
    )
    .await;
    DatabaseManager::close(pool).await;
    Ok(result?)
}

/// DDL against an already-open pool. Per-table, not per-run, atomicity:
/// a failure leaves earlier tables updated.
pub async fn apply_tenant_policies(
    pool: &PgPool,
    config: RlsPolicyConfig,
    schema: Option<&str>,
    verbose: bool,
) -> Result<RlsSummary, DatabaseError> {
    let tables = discover_tenant_tables(pool, schema).await?;

    if tables.is_empty() {
        if verbose {
            info!("No tables with tenantId column found; nothing to secure");
        }
        return Ok(RlsSummary {
            tables,
            allow_null_tenant: config.allow_null_tenant,
            force_rls: config.force_rls,
        });
    }

    for table in &tables {
        for statement in policy_statements(table, config) {
            debug!("{}", statement);
            sqlx::query(&statement).execute(pool).await?;
        }
        if verbose {
            info!(
                "Applied {} on {} (allow_null_tenant={}, force_rls={})",
                POLICY_NAME, table, config.allow_null_tenant, config.force_rls
            );
        }
    }

    if verbose {
        info!("RLS policies applied to {} table(s)", tables.len());
    }

    Ok(RlsSummary {
        tables,
        allow_null_tenant: config.allow_null_tenant,
        force_rls: config.force_rls,
    })
}
