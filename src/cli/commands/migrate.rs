use clap::Args;
use std::path::PathBuf;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::config;
use crate::migrate::{run_tenant_migrations, BatchStatus, MigrationConnector, PgConnector, StepOutcome};

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[arg(long, help = "Directory the migration paths are relative to (defaults to MIGRATIONS_ROOT or .)")]
    pub root: Option<PathBuf>,
}

/// Same procedure the HTTP trigger runs, for an operator at a shell
pub async fn handle(args: MigrateArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let database_url = require_database_url()?;
    let root = args.root.unwrap_or_else(|| config().migrate.root.clone());

    let mut target = PgConnector.connect(&database_url).await?;
    let result = run_tenant_migrations(target.as_mut(), &root).await;
    target.close().await;
    let report = result?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report.to_json())?);
        }
        OutputFormat::Text => {
            println!("Run {} ({})", report.run_id, report.status().as_str());
            println!("\nBackfill:");
            for outcome in &report.backfill.outcomes {
                let json = outcome.to_json();
                match json.get("error") {
                    Some(error) => println!("  ✗ {}: {}", outcome.name(), error),
                    None => println!("  ✓ {}: {} row(s)", outcome.name(), json["rowCount"]),
                }
            }
            println!("\nMigrations:");
            for outcome in &report.migrations.outcomes {
                let marker = if outcome.succeeded() { "✓" } else { "✗" };
                println!("  {} {}", marker, outcome.to_json());
            }
        }
    }

    if report.status() == BatchStatus::Partial {
        tracing::warn!("Some steps were not applied; see the report above");
    }

    Ok(())
}
