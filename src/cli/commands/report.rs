use anyhow::anyhow;
use clap::Args;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::config;
use crate::database::audit::{tenant_coverage, unexpected_missing, TenantCoverage, EXPECTED_TENANT_TABLES};
use crate::database::manager::DatabaseManager;

#[derive(Args, Debug)]
pub struct ReportArgs {
    #[arg(long, help = "Schema holding the tenant tables (defaults to POSTGRES_SCHEMA or public)")]
    pub schema: Option<String>,
}

/// Coverage of the tenant column across every table that should carry it.
/// Fails when an expected column is missing.
pub async fn handle(args: ReportArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let database_url = require_database_url()?;
    let schema = args
        .schema
        .map(|s| s.replace('"', ""))
        .unwrap_or_else(|| config().report.schema.clone());

    let pool = DatabaseManager::connect(&database_url).await?;
    let result = tenant_coverage(&pool, &schema, &EXPECTED_TENANT_TABLES).await;
    DatabaseManager::close(pool).await;
    let coverage = result?;

    let missing = unexpected_missing(&coverage);

    match output_format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "schema": schema, "tables": coverage }))?
            );
        }
        OutputFormat::Text => {
            for line in format_table(
                &["Table", "Column", "Status", "Expected", "Total", "NULL", "NULL %", "Notes"],
                &coverage.iter().map(coverage_row).collect::<Vec<_>>(),
            ) {
                println!("{}", line);
            }
            if !missing.is_empty() {
                eprintln!("\nUnexpected missing columns detected:");
                for row in &missing {
                    eprintln!("- {}.{}", row.table, row.column);
                }
            }
        }
    }

    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(|row| format!("{}.{}", row.table, row.column)).collect();
        return Err(anyhow!("Unexpected missing columns: {}", names.join(", ")));
    }

    Ok(())
}

fn coverage_row(row: &TenantCoverage) -> Vec<String> {
    let count = |value: Option<i64>| value.map_or_else(|| "—".to_string(), |v| v.to_string());
    vec![
        row.table.clone(),
        row.column.clone(),
        row.column_status.as_str().to_string(),
        row.expected.as_str().to_string(),
        count(row.total_rows),
        count(row.null_rows),
        row.null_percentage
            .map_or_else(|| "—".to_string(), |pct| format!("{:.2}%", pct)),
        row.note().unwrap_or_default(),
    ]
}
