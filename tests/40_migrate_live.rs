//! Backfill, migration and coverage SQL against a real Postgres, inside a throwaway
//! schema reached through `search_path`. Skipped unless TEST_DATABASE_URL is set.

mod common;

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use serde_json::json;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

use tenant_guard::database::audit::unexpected_missing;
use tenant_guard::database::{normalize_database_url, tenant_coverage, ColumnStatus, EXPECTED_TENANT_TABLES};
use tenant_guard::migrate::backfill::{run_backfill, SERVICE_REQUEST_STEP};
use tenant_guard::migrate::{
    run_schema_migrations, MigrationTarget, PgMigrationTarget, StepOutcome, BACKFILL_STEPS, MIGRATION_STEPS,
};

struct Scratch {
    admin: PgPool,
    schema: String,
    url: String,
}

impl Scratch {
    async fn create(url: &str, tables: &[&str]) -> Result<Self> {
        let url = normalize_database_url(url);
        let admin = PgPoolOptions::new().max_connections(1).connect(&url).await?;
        let schema = format!("tg_mig_{}", &Uuid::new_v4().simple().to_string()[..12]);

        sqlx::query(&format!("CREATE SCHEMA {schema}")).execute(&admin).await?;
        for ddl in tables {
            sqlx::query(&ddl.replace("{schema}", &schema)).execute(&admin).await?;
        }

        Ok(Self { admin, schema, url })
    }

    /// A migration target whose unqualified table names resolve to the scratch schema
    async fn target(&self) -> Result<PgMigrationTarget> {
        let options = PgConnectOptions::from_str(&self.url)?.options([("search_path", self.schema.as_str())]);
        let pool = PgPoolOptions::new().max_connections(1).connect_with(options).await?;
        Ok(PgMigrationTarget::new(pool))
    }

    async fn column_count(&self, table: &str, column: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)::bigint FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 AND column_name = $3",
        )
        .bind(&self.schema)
        .bind(table)
        .bind(column)
        .fetch_one(&self.admin)
        .await?;
        Ok(count)
    }

    async fn drop(self) -> Result<()> {
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await?;
        self.admin.close().await;
        Ok(())
    }
}

fn write_migration(root: &Path, relative: &str, sql: &str) -> Result<()> {
    let file = root.join(relative);
    if let Some(dir) = file.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(file, sql)?;
    Ok(())
}

#[tokio::test]
async fn service_request_inherits_tenant_from_its_client() -> Result<()> {
    let Some(url) = common::live_database_url() else { return Ok(()) };
    let scratch = Scratch::create(
        &url,
        &[
            r#"CREATE TABLE {schema}."users" ("id" text PRIMARY KEY, "tenantId" text)"#,
            r#"CREATE TABLE {schema}."services" ("id" text PRIMARY KEY, "tenantId" text)"#,
            r#"CREATE TABLE {schema}."ServiceRequest" ("id" text PRIMARY KEY, "clientId" text, "serviceId" text, "tenantId" text)"#,
            r#"INSERT INTO {schema}."users" VALUES ('u1', 'tenant-A')"#,
            r#"INSERT INTO {schema}."ServiceRequest" VALUES ('sr1', 'u1', NULL, NULL), ('sr2', 'nobody', NULL, NULL)"#,
        ],
    )
    .await?;

    let mut target = scratch.target().await?;
    let report = run_backfill(&mut target, &BACKFILL_STEPS[..1]).await?;
    assert_eq!(report.to_json(), json!([{ "name": SERVICE_REQUEST_STEP, "rowCount": 1 }]));

    let tenant: Option<String> = sqlx::query_scalar(&format!(
        "SELECT \"tenantId\" FROM {}.\"ServiceRequest\" WHERE id = 'sr1'",
        scratch.schema
    ))
    .fetch_one(&scratch.admin)
    .await?;
    assert_eq!(tenant.as_deref(), Some("tenant-A"));

    // the orphan has nothing to derive from and stays NULL
    assert_eq!(target.count_null_tenant_rows("ServiceRequest").await?, 1);

    // rerunning writes nothing new
    let rerun = run_backfill(&mut target, &BACKFILL_STEPS[..1]).await?;
    assert_eq!(rerun.outcomes[0].to_json()["rowCount"], 0);

    Box::new(target).close().await;
    scratch.drop().await
}

#[tokio::test]
async fn broken_migration_file_leaves_no_partial_ddl() -> Result<()> {
    let Some(url) = common::live_database_url() else { return Ok(()) };
    let scratch = Scratch::create(
        &url,
        &[r#"CREATE TABLE {schema}."Booking" ("id" serial PRIMARY KEY, "tenantId" text)"#],
    )
    .await?;

    let dir = tempfile::tempdir()?;
    write_migration(
        dir.path(),
        MIGRATION_STEPS[0].path,
        "ALTER TABLE \"Booking\" ADD COLUMN extra_col int;\nSELEC broken;",
    )?;

    let mut target = scratch.target().await?;
    let report = run_schema_migrations(&mut target, dir.path(), &MIGRATION_STEPS[..1]).await;
    Box::new(target).close().await;

    let outcome = report.outcomes[0].to_json();
    assert_eq!(outcome["applied"], false);
    assert!(outcome["error"].is_string());
    assert_eq!(scratch.column_count("Booking", "extra_col").await?, 0);

    scratch.drop().await
}

#[tokio::test]
async fn clean_migration_commits_and_reports_null_count() -> Result<()> {
    let Some(url) = common::live_database_url() else { return Ok(()) };
    let scratch = Scratch::create(
        &url,
        &[
            r#"CREATE TABLE {schema}."Booking" ("id" serial PRIMARY KEY, "tenantId" text)"#,
            r#"INSERT INTO {schema}."Booking" ("tenantId") VALUES ('tenant-A')"#,
        ],
    )
    .await?;

    let dir = tempfile::tempdir()?;
    write_migration(
        dir.path(),
        MIGRATION_STEPS[0].path,
        "ALTER TABLE \"Booking\" ALTER COLUMN \"tenantId\" SET NOT NULL;\nALTER TABLE \"Booking\" ADD COLUMN extra_col int;",
    )?;

    let mut target = scratch.target().await?;
    let report = run_schema_migrations(&mut target, dir.path(), &MIGRATION_STEPS[..1]).await;
    Box::new(target).close().await;

    let outcome = report.outcomes[0].to_json();
    assert_eq!(outcome["applied"], true);
    assert_eq!(outcome["nullCount"], 0);
    assert_eq!(scratch.column_count("Booking", "extra_col").await?, 1);

    scratch.drop().await
}

#[tokio::test]
async fn coverage_reports_expected_tables_without_the_column() -> Result<()> {
    let Some(url) = common::live_database_url() else { return Ok(()) };
    let scratch = Scratch::create(
        &url,
        &[
            r#"CREATE TABLE {schema}."Booking" ("id" serial PRIMARY KEY, "tenantId" text)"#,
            r#"INSERT INTO {schema}."Booking" ("tenantId") VALUES ('tenant-A'), (NULL), (NULL), ('tenant-B')"#,
            r#"CREATE TABLE {schema}."services" ("id" serial PRIMARY KEY, "name" text)"#,
        ],
    )
    .await?;

    let coverage = tenant_coverage(&scratch.admin, &scratch.schema, &EXPECTED_TENANT_TABLES).await?;
    assert_eq!(coverage.len(), EXPECTED_TENANT_TABLES.len());

    let booking = coverage.iter().find(|row| row.table == "Booking").unwrap();
    assert_eq!(booking.column_status, ColumnStatus::Present);
    assert_eq!((booking.total_rows, booking.null_rows), (Some(4), Some(2)));
    assert_eq!(booking.null_percentage, Some(50.0));

    let services = coverage.iter().find(|row| row.table == "services").unwrap();
    assert_eq!(services.column_status, ColumnStatus::Missing);
    assert_eq!(services.note().as_deref(), Some("Column missing"));

    // every expected table except Booking lacks the column here
    assert_eq!(unexpected_missing(&coverage).len(), EXPECTED_TENANT_TABLES.len() - 1);

    scratch.drop().await
}
