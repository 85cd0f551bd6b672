use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

use crate::migrate::{BatchReport, MigrationTarget, StepOutcome};

/// A NOT NULL migration file and the table whose tenants it pins down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStep {
    pub path: &'static str,
    pub verify_table: Option<&'static str>,
}

// Dependency order: bookings before service requests before work orders, and
// so on down to idempotency keys.
pub const MIGRATION_STEPS: [MigrationStep; 10] = [
    MigrationStep {
        path: "prisma/migrations/20251004_add_booking_tenantid_not_null/migration.sql",
        verify_table: Some("Booking"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_servicerequest_tenantid_not_null/migration.sql",
        verify_table: Some("ServiceRequest"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_service_tenantid_not_null/migration.sql",
        verify_table: Some("Service"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_workorder_tenantid_not_null/migration.sql",
        verify_table: Some("WorkOrder"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_invoice_tenantid_not_null/migration.sql",
        verify_table: Some("Invoice"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_expense_tenantid_not_null/migration.sql",
        verify_table: Some("Expense"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_attachment_tenantid_not_null/migration.sql",
        verify_table: Some("Attachment"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_scheduledreminder_tenantid_not_null/migration.sql",
        verify_table: Some("ScheduledReminder"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_bookingsettings_tenantid_not_null/migration.sql",
        verify_table: Some("BookingSettings"),
    },
    MigrationStep {
        path: "prisma/migrations/20251004_add_idempotencykey_tenantid_not_null/migration.sql",
        verify_table: Some("IdempotencyKey"),
    },
];

/// Result of one migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// File not on disk; nothing attempted
    Missing { migration: String },
    /// Committed. The NULL count is observational and never fails the step.
    Applied {
        migration: String,
        null_count: Option<i64>,
        verify_error: Option<String>,
    },
    /// Rolled back
    Failed { migration: String, error: String },
}

impl MigrationOutcome {
    pub fn migration(&self) -> &str {
        match self {
            MigrationOutcome::Missing { migration }
            | MigrationOutcome::Applied { migration, .. }
            | MigrationOutcome::Failed { migration, .. } => migration,
        }
    }
}

impl StepOutcome for MigrationOutcome {
    fn succeeded(&self) -> bool {
        matches!(self, MigrationOutcome::Applied { .. })
    }

    fn to_json(&self) -> Value {
        match self {
            MigrationOutcome::Missing { migration } => json!({
                "migration": migration,
                "status": "missing"
            }),
            MigrationOutcome::Applied {
                migration,
                null_count,
                verify_error,
            } => {
                let mut value = json!({
                    "migration": migration,
                    "applied": true,
                    "nullCount": null_count
                });
                if let Some(error) = verify_error {
                    value["verifyError"] = json!(error);
                }
                value
            }
            MigrationOutcome::Failed { migration, error } => json!({
                "migration": migration,
                "applied": false,
                "error": error
            }),
        }
    }
}

/// Apply each file in its own transaction; one failure never blocks the rest
pub async fn run_schema_migrations(
    target: &mut dyn MigrationTarget,
    root: &Path,
    steps: &[MigrationStep],
) -> BatchReport<MigrationOutcome> {
    let mut outcomes = Vec::with_capacity(steps.len());

    for step in steps {
        outcomes.push(apply_step(target, root, step).await);
    }

    BatchReport::new(outcomes)
}

async fn apply_step(target: &mut dyn MigrationTarget, root: &Path, step: &MigrationStep) -> MigrationOutcome {
    let migration = step.path.to_string();
    let file = root.join(step.path);

    let sql = match tokio::fs::read_to_string(&file).await {
        Ok(sql) => sql,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Migration {} missing at {}", step.path, file.display());
            return MigrationOutcome::Missing { migration };
        }
        Err(e) => {
            warn!("Migration {} unreadable: {}", step.path, e);
            return MigrationOutcome::Failed {
                migration,
                error: e.to_string(),
            };
        }
    };

    if let Err(e) = target.apply_migration(&sql).await {
        warn!("Migration {} rolled back: {}", step.path, e);
        return MigrationOutcome::Failed {
            migration,
            error: e.to_string(),
        };
    }

    let (null_count, verify_error) = match step.verify_table {
        Some(table) => match target.count_null_tenant_rows(table).await {
            Ok(count) => (Some(count), None),
            Err(e) => (None, Some(e.to_string())),
        },
        None => (None, None),
    };

    info!("Migration {} applied (null tenants: {:?})", step.path, null_count);
    MigrationOutcome::Applied {
        migration,
        null_count,
        verify_error,
    }
}
