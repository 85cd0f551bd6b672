pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "tenantctl")]
#[command(about = "tenantctl - tenant backfill, NOT NULL migrations and row-level-security rollout")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run RLS rollout phases (prepare, tighten, enforce) with NULL-tenant gating")]
    Rollout(commands::rollout::RolloutArgs),

    #[command(name = "setup-rls", about = "Apply the tenant isolation policy to every tenant table once")]
    SetupRls(commands::setup::SetupArgs),

    #[command(about = "Backfill NULL tenant ids from related records")]
    Backfill(commands::backfill::BackfillArgs),

    #[command(about = "Backfill, then apply the NOT NULL tenant migrations")]
    Migrate(commands::migrate::MigrateArgs),

    #[command(about = "Report NULL tenant coverage per tenant table")]
    Report(commands::report::ReportArgs),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Rollout(args) => commands::rollout::handle(args, output_format).await,
        Commands::SetupRls(args) => commands::setup::handle(args, output_format).await,
        Commands::Backfill(args) => commands::backfill::handle(args, output_format).await,
        Commands::Migrate(args) => commands::migrate::handle(args, output_format).await,
        Commands::Report(args) => commands::report::handle(args, output_format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollout_accepts_spaced_and_inline_phase() {
        let cli = Cli::try_parse_from(["tenantctl", "rollout", "--phase", "tighten", "--force"]).unwrap();
        let Commands::Rollout(args) = cli.command else { panic!("expected rollout") };
        assert_eq!(args.phase.as_deref(), Some("tighten"));
        assert!(args.force);

        let cli = Cli::try_parse_from(["tenantctl", "rollout", "--phase=auto", "--dry-run"]).unwrap();
        let Commands::Rollout(args) = cli.command else { panic!("expected rollout") };
        assert_eq!(args.phase.as_deref(), Some("auto"));
        assert!(args.dry_run);
    }

    #[test]
    fn bare_phase_flag_falls_back_to_prepare() {
        let cli = Cli::try_parse_from(["tenantctl", "rollout", "--phase", "--dry-run"]).unwrap();
        let Commands::Rollout(args) = cli.command else { panic!("expected rollout") };
        assert_eq!(args.phase.as_deref(), Some("prepare"));
        assert!(args.dry_run);

        let cli = Cli::try_parse_from(["tenantctl", "rollout", "--phase"]).unwrap();
        let Commands::Rollout(args) = cli.command else { panic!("expected rollout") };
        assert_eq!(args.phase.as_deref(), Some("prepare"));
    }

    #[test]
    fn post_check_is_an_alias_for_verify() {
        let cli = Cli::try_parse_from(["tenantctl", "rollout", "--post-check", "--sequential"]).unwrap();
        let Commands::Rollout(args) = cli.command else { panic!("expected rollout") };
        assert!(args.verify);
        assert!(args.sequential);
    }

    #[test]
    fn setup_overrides_are_optional_booleans() {
        let cli = Cli::try_parse_from(["tenantctl", "--json", "setup-rls", "--allow-null-tenant", "false"]).unwrap();
        assert!(matches!(OutputFormat::from_cli(&cli), OutputFormat::Json));
        let Commands::SetupRls(args) = cli.command else { panic!("expected setup-rls") };
        assert_eq!(args.allow_null_tenant, Some(false));
        assert_eq!(args.force_rls, None);
    }
}
