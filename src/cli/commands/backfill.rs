use clap::Args;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::manager::DatabaseManager;
use crate::migrate::backfill::{remaining_null_counts, run_backfill, BACKFILL_STEPS};
use crate::migrate::{BatchStatus, MigrationTarget, PgMigrationTarget, StepOutcome};

#[derive(Args, Debug)]
pub struct BackfillArgs {
    #[arg(long, help = "Skip the remaining NULL count pass")]
    pub no_remaining: bool,
}

pub async fn handle(args: BackfillArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let database_url = require_database_url()?;
    let pool = DatabaseManager::connect(&database_url).await?;
    let mut target = PgMigrationTarget::new(pool);

    if let OutputFormat::Text = output_format {
        println!("Starting tenantId backfill for tenant scoped tables...");
    }

    let report = match run_backfill(&mut target, &BACKFILL_STEPS).await {
        Ok(report) => report,
        Err(e) => {
            Box::new(target).close().await;
            return Err(e.into());
        }
    };

    let remaining = if args.no_remaining {
        Vec::new()
    } else {
        remaining_null_counts(&mut target, &BACKFILL_STEPS).await
    };
    Box::new(target).close().await;

    let mut lines = Vec::new();
    for outcome in &report.outcomes {
        let json = outcome.to_json();
        match json.get("error") {
            Some(error) => lines.push(format!("Executing: {}\n  -> FAILED: {}", outcome.name(), error)),
            None => lines.push(format!("Executing: {}\n  -> Rows updated: {}", outcome.name(), json["rowCount"])),
        }
    }
    if !remaining.is_empty() {
        lines.push(String::new());
        lines.push("Remaining NULL counts:".to_string());
        for (table, count) in &remaining {
            match count {
                Ok(count) => lines.push(format!("  {}.tenantId: {}", table, count)),
                Err(e) => lines.push(format!("  {}.tenantId: error ({})", table, e)),
            }
        }
    }
    output_lines(&output_format, &lines);

    let remaining_json: Vec<_> = remaining
        .iter()
        .map(|(table, count)| match count {
            Ok(count) => json!({ "table": table, "nullCount": count }),
            Err(e) => json!({ "table": table, "error": e }),
        })
        .collect();
    let data = json!({
        "status": report.status().as_str(),
        "backfillResults": report.to_json(),
        "remaining": remaining_json,
    });

    match report.status() {
        BatchStatus::Complete => output_success(
            &output_format,
            "Backfill complete. Review tables with non-zero remaining counts for manual remediation.",
            Some(data),
        ),
        BatchStatus::Partial => output_success(
            &output_format,
            &format!(
                "Backfill finished with {} failed step(s); fix the cause and rerun.",
                report.failures().count()
            ),
            Some(data),
        ),
    }
}
