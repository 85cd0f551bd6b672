use clap::Args;
use serde_json::json;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::rls::{setup_tenant_rls, SetupOptions};

#[derive(Args, Debug)]
pub struct SetupArgs {
    #[arg(long, help = "Override RLS_ALLOW_NULL_TENANT (true|false)")]
    pub allow_null_tenant: Option<bool>,

    #[arg(long, help = "Override FORCE_RLS (true|false)")]
    pub force_rls: Option<bool>,

    #[arg(long, help = "Only touch tables in this schema (defaults to RLS_SCHEMA)")]
    pub schema: Option<String>,

    #[arg(long, help = "Suppress per-table progress logging")]
    pub quiet: bool,
}

pub async fn handle(args: SetupArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let options = SetupOptions {
        database_url: None,
        allow_null_tenant: args.allow_null_tenant,
        force_rls: args.force_rls,
        verbose: Some(!args.quiet),
        schema: args.schema,
    };

    let summary = setup_tenant_rls(options).await?;

    let tables: Vec<String> = summary.tables.iter().map(ToString::to_string).collect();
    output_lines(&output_format, &tables.iter().map(|t| format!("  - {}", t)).collect::<Vec<_>>());
    output_success(
        &output_format,
        &format!(
            "RLS policy applied to {} table(s) (allow_null_tenant={}, force_rls={})",
            tables.len(),
            summary.allow_null_tenant,
            summary.force_rls
        ),
        Some(json!({ "summary": summary })),
    )
}
