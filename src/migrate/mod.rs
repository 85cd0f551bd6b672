pub mod backfill;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::{Executor, PgPool};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::audit::count_null_tenant_rows;
use crate::database::manager::{quote_identifier, DatabaseError, DatabaseManager};

pub use backfill::{run_backfill, BackfillOutcome, BackfillStep, PlanError, BACKFILL_STEPS};
pub use schema::{run_schema_migrations, MigrationOutcome, MigrationStep, MIGRATION_STEPS};

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// The statements the backfill and migration batches need from a session
#[async_trait]
pub trait MigrationTarget: Send {
    /// Run one backfill statement, returning affected rows
    async fn execute_backfill(&mut self, sql: &str) -> Result<u64, DatabaseError>;

    /// Run a migration file as one batch inside BEGIN/COMMIT; roll back on error
    async fn apply_migration(&mut self, sql: &str) -> Result<(), DatabaseError>;

    /// NULL tenants in an unqualified table name
    async fn count_null_tenant_rows(&mut self, table: &str) -> Result<i64, DatabaseError>;

    async fn close(self: Box<Self>);
}

/// Opens migration sessions. Split out so the HTTP trigger can be tested
/// without a database.
#[async_trait]
pub trait MigrationConnector: Send + Sync {
    async fn connect(&self, database_url: &str) -> Result<Box<dyn MigrationTarget>, DatabaseError>;
}

pub struct PgConnector;

#[async_trait]
impl MigrationConnector for PgConnector {
    async fn connect(&self, database_url: &str) -> Result<Box<dyn MigrationTarget>, DatabaseError> {
        let pool = DatabaseManager::connect(database_url).await?;
        Ok(Box::new(PgMigrationTarget { pool }))
    }
}

pub struct PgMigrationTarget {
    pool: PgPool,
}

impl PgMigrationTarget {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationTarget for PgMigrationTarget {
    async fn execute_backfill(&mut self, sql: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn apply_migration(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        // Unprepared execution so multi-statement files run as one batch
        match (&mut *tx).execute(sql).await {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback after failed migration also failed: {}", rollback);
                }
                Err(e.into())
            }
        }
    }

    async fn count_null_tenant_rows(&mut self, table: &str) -> Result<i64, DatabaseError> {
        count_null_tenant_rows(&self.pool, &quote_identifier(table)).await
    }

    async fn close(self: Box<Self>) {
        DatabaseManager::close(self.pool).await;
    }
}

/// Whether every step in a batch succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Complete,
    Partial,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Complete => "complete",
            BatchStatus::Partial => "partial",
        }
    }
}

pub trait StepOutcome {
    fn succeeded(&self) -> bool;
    fn to_json(&self) -> Value;
}

/// Per-step outcomes of a continue-on-error batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport<T> {
    pub outcomes: Vec<T>,
}

impl<T: StepOutcome> BatchReport<T> {
    pub fn new(outcomes: Vec<T>) -> Self {
        Self { outcomes }
    }

    pub fn status(&self) -> BatchStatus {
        if self.outcomes.iter().all(StepOutcome::succeeded) {
            BatchStatus::Complete
        } else {
            BatchStatus::Partial
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().filter(|outcome| !outcome.succeeded())
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.outcomes.iter().map(StepOutcome::to_json).collect())
    }
}

/// Everything one backfill + migration run did
#[derive(Debug, Clone)]
pub struct TenantMigrationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub backfill: BatchReport<BackfillOutcome>,
    pub migrations: BatchReport<MigrationOutcome>,
}

impl TenantMigrationReport {
    pub fn status(&self) -> BatchStatus {
        match (self.backfill.status(), self.migrations.status()) {
            (BatchStatus::Complete, BatchStatus::Complete) => BatchStatus::Complete,
            _ => BatchStatus::Partial,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "runId": self.run_id,
            "status": self.status().as_str(),
            "startedAt": self.started_at,
            "finishedAt": self.finished_at,
            "backfillResults": self.backfill.to_json(),
            "migrationResults": self.migrations.to_json(),
        })
    }
}

/// Backfill first, then the NOT NULL migrations, on one session
pub async fn run_tenant_migrations(
    target: &mut dyn MigrationTarget,
    migrations_root: &Path,
) -> Result<TenantMigrationReport, MigrateError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!("Tenant migration run {} started", run_id);

    let backfill = run_backfill(target, &BACKFILL_STEPS).await?;
    let migrations = run_schema_migrations(target, migrations_root, &MIGRATION_STEPS).await;

    let report = TenantMigrationReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        backfill,
        migrations,
    };

    match report.status() {
        BatchStatus::Complete => info!("Tenant migration run {} complete", run_id),
        BatchStatus::Partial => warn!(
            "Tenant migration run {} finished with {} backfill and {} migration step(s) not applied",
            run_id,
            report.backfill.failures().count(),
            report.migrations.failures().count()
        ),
    }

    Ok(report)
}
