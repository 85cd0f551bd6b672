use clap::Args;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::config;
use crate::database::audit;
use crate::rollout::{run_rollout, PgRolloutTarget, PhaseReport, RolloutError, RolloutOptions, RolloutPlan};

#[derive(Args, Debug)]
pub struct RolloutArgs {
    #[arg(
        long,
        num_args = 0..=1,
        default_missing_value = "prepare",
        help = "Phase to run: prepare, tighten, enforce, or auto (default: prepare)"
    )]
    pub phase: Option<String>,

    #[arg(long, help = "Walk every remaining phase from the starting phase")]
    pub sequential: bool,

    #[arg(long, help = "Audit but do not touch policies")]
    pub dry_run: bool,

    #[arg(long, help = "Continue even when NULL tenantId rows remain")]
    pub force: bool,

    #[arg(long, visible_alias = "post-check", help = "Re-audit after applying, even for prepare")]
    pub verify: bool,

    #[arg(long, help = "Only touch tables in this schema (defaults to RLS_SCHEMA)")]
    pub schema: Option<String>,
}

pub async fn handle(args: RolloutArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let plan = RolloutPlan::from_args(args.phase.as_deref(), args.sequential)?;
    let database_url = require_database_url()?;
    let schema = args.schema.or_else(|| config().rls.schema.clone());

    let options = RolloutOptions {
        dry_run: args.dry_run,
        force: args.force,
        verify: args.verify,
    };
    let target = PgRolloutTarget::new(database_url, schema);

    match run_rollout(&target, plan, options).await {
        Ok(reports) => {
            for report in &reports {
                output_lines(&output_format, &phase_lines(report));
            }
            output_success(
                &output_format,
                "RLS rollout sequence completed successfully.",
                Some(json!({ "phases": reports })),
            )
        }
        Err(failure) => {
            for report in &failure.completed {
                output_lines(&output_format, &phase_lines(report));
            }

            let offenders = match &failure.source {
                RolloutError::NullTenantRows { offenders } => offenders.clone(),
                _ => Vec::new(),
            };
            output_lines(&output_format, &audit::summarize(&offenders));
            output_error(
                &output_format,
                &failure.to_string(),
                Some(json!({
                    "failedPhase": failure.phase,
                    "offenders": offenders,
                    "phases": failure.completed,
                })),
            )?;

            Err(failure.into())
        }
    }
}

fn phase_lines(report: &PhaseReport) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        format!("=== Phase: {} ===", report.phase.as_str().to_uppercase()),
        report.description.to_string(),
    ];

    if let Some(rows) = &report.pre_audit {
        if report.forced {
            lines.extend(report.warnings.iter().map(|w| format!("WARNING: {}", w)));
            lines.extend(audit::summarize(rows));
        } else {
            lines.push("Pre-check audit complete. No NULL tenantId rows detected.".to_string());
        }
    }

    if report.dry_run {
        lines.push(format!(
            "[dry-run] Would call setup-rls with allow_null_tenant={}, force_rls={}",
            report.policy.allow_null_tenant, report.policy.force_rls
        ));
        return lines;
    }

    if let Some(applied) = &report.applied {
        lines.push(format!(
            "Applied policy to {} table(s) (allow_null_tenant={}, force_rls={})",
            applied.tables.len(),
            applied.allow_null_tenant,
            applied.force_rls
        ));
    }

    if let Some(rows) = &report.post_audit {
        lines.extend(audit::summarize(rows));
    }

    lines
}
