use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::audit::{self, audit_null_tenant_rows, AuditRow};
use crate::database::manager::DatabaseManager;
use crate::rls::{self, ResolvedSetup, RlsPolicyConfig, RlsSummary};
use crate::rollout::{Phase, RolloutError, RolloutPlan};

/// Database side of the rollout: audit and apply
#[async_trait]
pub trait RolloutTarget: Send + Sync {
    /// NULL-tenant counts for every discovered table
    async fn audit(&self) -> Result<Vec<AuditRow>, RolloutError>;

    /// Run the policy applier with a fixed configuration
    async fn apply(&self, config: RlsPolicyConfig) -> Result<RlsSummary, RolloutError>;
}

/// Live Postgres target. Each call opens and closes its own connection.
pub struct PgRolloutTarget {
    database_url: String,
    schema: Option<String>,
}

impl PgRolloutTarget {
    pub fn new(database_url: impl Into<String>, schema: Option<String>) -> Self {
        Self {
            database_url: database_url.into(),
            schema,
        }
    }
}

#[async_trait]
impl RolloutTarget for PgRolloutTarget {
    async fn audit(&self) -> Result<Vec<AuditRow>, RolloutError> {
        let pool = DatabaseManager::connect(&self.database_url).await?;
        let result = audit_null_tenant_rows(&pool, self.schema.as_deref()).await;
        DatabaseManager::close(pool).await;
        Ok(result?)
    }

    async fn apply(&self, config: RlsPolicyConfig) -> Result<RlsSummary, RolloutError> {
        let resolved = ResolvedSetup {
            database_url: self.database_url.clone(),
            config,
            verbose: true,
            schema: self.schema.clone(),
        };
        Ok(rls::run_setup(&resolved).await?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloutOptions {
    pub dry_run: bool,
    pub force: bool,
    pub verify: bool,
}

/// What happened during one phase
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: Phase,
    pub description: &'static str,
    pub policy: RlsPolicyConfig,
    pub pre_audit: Option<Vec<AuditRow>>,
    pub forced: bool,
    pub dry_run: bool,
    pub applied: Option<RlsSummary>,
    pub post_audit: Option<Vec<AuditRow>>,
    pub warnings: Vec<String>,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        let config = phase.config();
        Self {
            phase,
            description: config.description,
            policy: config.policy,
            pre_audit: None,
            forced: false,
            dry_run: false,
            applied: None,
            post_audit: None,
            warnings: Vec::new(),
        }
    }
}

/// A phase failed; later phases were not attempted
#[derive(Debug, Error)]
#[error("Phase {phase} failed: {source}")]
pub struct RolloutFailure {
    pub phase: Phase,
    pub source: RolloutError,
    pub completed: Vec<PhaseReport>,
}

/// Run one phase: gate, apply, verify.
pub async fn execute_phase(
    target: &dyn RolloutTarget,
    phase: Phase,
    options: RolloutOptions,
) -> Result<PhaseReport, RolloutError> {
    let mut report = PhaseReport::new(phase);
    info!("=== Phase: {} ===", phase.as_str().to_uppercase());
    info!("{}", report.description);

    if phase.is_gated() {
        let rows = target.audit().await?;
        let offending = audit::offenders(&rows);

        if !offending.is_empty() && !options.force {
            for line in audit::summarize(&rows) {
                error!("{}", line);
            }
            return Err(RolloutError::NullTenantRows { offenders: offending });
        }

        if !offending.is_empty() {
            let tables: Vec<String> = offending
                .iter()
                .map(|row| format!("{}.{} ({})", row.schema, row.table, row.null_count))
                .collect();
            let message = format!(
                "Continuing despite NULL tenantId rows because --force flag was provided: {}",
                tables.join(", ")
            );
            warn!("{}", message);
            for line in audit::summarize(&rows) {
                warn!("{}", line);
            }
            report.forced = true;
            report.warnings.push(message);
        } else {
            info!("Pre-check audit complete. No NULL tenantId rows detected.");
        }

        report.pre_audit = Some(rows);
    }

    if options.dry_run {
        info!(
            "[dry-run] Would call setup_tenant_rls with allow_null_tenant={}, force_rls={}",
            report.policy.allow_null_tenant, report.policy.force_rls
        );
        report.dry_run = true;
        return Ok(report);
    }

    report.applied = Some(target.apply(report.policy).await?);

    if options.verify || phase.is_gated() {
        let rows = target.audit().await?;
        for line in audit::summarize(&rows) {
            info!("{}", line);
        }
        report.post_audit = Some(rows);
    }

    Ok(report)
}

/// Walk the plan in order, stopping at the first phase that fails
pub async fn run_rollout(
    target: &dyn RolloutTarget,
    plan: RolloutPlan,
    options: RolloutOptions,
) -> Result<Vec<PhaseReport>, RolloutFailure> {
    let mut completed = Vec::new();

    for phase in plan.phases() {
        match execute_phase(target, phase, options).await {
            Ok(report) => completed.push(report),
            Err(source) => {
                error!("Phase {} failed: {}", phase, source);
                return Err(RolloutFailure {
                    phase,
                    source,
                    completed,
                });
            }
        }
    }

    info!("RLS rollout sequence completed successfully.");
    Ok(completed)
}
