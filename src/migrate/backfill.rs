//! Tenant identifier backfill.
//!
//! Every step only touches rows whose `tenantId` is still NULL and only
//! writes a tenant it could derive from an already-scoped row, so reruns are
//! no-ops on fixed data.

use serde_json::{json, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};

use crate::migrate::{BatchReport, MigrationTarget, StepOutcome};

/// One backfill statement plus the tables it touches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillStep {
    pub name: &'static str,
    pub writes: &'static str,
    pub reads: &'static [&'static str],
    pub depends_on: &'static [&'static str],
    pub sql: &'static str,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate backfill step '{0}'")]
    DuplicateStep(String),

    #[error("backfill step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("backfill steps form a dependency cycle: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

pub const SERVICE_REQUEST_STEP: &str = "ServiceRequest from client/service relationships";

pub const BACKFILL_STEPS: [BackfillStep; 9] = [
    BackfillStep {
        name: SERVICE_REQUEST_STEP,
        writes: "ServiceRequest",
        reads: &["users", "services"],
        depends_on: &[],
        sql: r#"
      WITH source AS (
        SELECT sr."id", COALESCE(u."tenantId", s."tenantId") AS tenant_id
        FROM "ServiceRequest" sr
        LEFT JOIN "users" u ON u."id" = sr."clientId"
        LEFT JOIN "services" s ON s."id" = sr."serviceId"
        WHERE sr."tenantId" IS NULL
      )
      UPDATE "ServiceRequest" sr
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE sr."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
    BackfillStep {
        name: "WorkOrder from related entities",
        writes: "WorkOrder",
        reads: &["ServiceRequest", "bookings", "users"],
        depends_on: &[SERVICE_REQUEST_STEP],
        sql: r#"
      WITH source AS (
        SELECT w."id", COALESCE(sr."tenantId", b."tenantId", uc."tenantId") AS tenant_id
        FROM "WorkOrder" w
        LEFT JOIN "ServiceRequest" sr ON sr."id" = w."serviceRequestId"
        LEFT JOIN "bookings" b ON b."id" = w."bookingId"
        LEFT JOIN "users" uc ON uc."id" = w."clientId"
        WHERE w."tenantId" IS NULL
      )
      UPDATE "WorkOrder" w
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE w."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
    BackfillStep {
        name: "Invoice from booking/client",
        writes: "invoices",
        reads: &["bookings", "users"],
        depends_on: &[],
        sql: r#"
      WITH source AS (
        SELECT i."id", COALESCE(b."tenantId", u."tenantId") AS tenant_id
        FROM "invoices" i
        LEFT JOIN "bookings" b ON b."id" = i."bookingId"
        LEFT JOIN "users" u ON u."id" = i."clientId"
        WHERE i."tenantId" IS NULL
      )
      UPDATE "invoices" i
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE i."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
    BackfillStep {
        name: "Expense from submitting user",
        writes: "expenses",
        reads: &["users"],
        depends_on: &[],
        sql: r#"
      WITH source AS (
        SELECT e."id", u."tenantId" AS tenant_id
        FROM "expenses" e
        LEFT JOIN "users" u ON u."id" = e."userId"
        WHERE e."tenantId" IS NULL
      )
      UPDATE "expenses" e
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE e."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
    BackfillStep {
        name: "Attachment from linked service request",
        writes: "Attachment",
        reads: &["ServiceRequest"],
        depends_on: &[SERVICE_REQUEST_STEP],
        sql: r#"
      WITH source AS (
        SELECT a."id", sr."tenantId" AS tenant_id
        FROM "Attachment" a
        LEFT JOIN "ServiceRequest" sr ON sr."id" = a."serviceRequestId"
        WHERE a."tenantId" IS NULL
      )
      UPDATE "Attachment" a
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE a."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
    BackfillStep {
        name: "ScheduledReminder from service request",
        writes: "ScheduledReminder",
        reads: &["ServiceRequest"],
        depends_on: &[SERVICE_REQUEST_STEP],
        sql: r#"
      WITH source AS (
        SELECT r."id", sr."tenantId" AS tenant_id
        FROM "ScheduledReminder" r
        LEFT JOIN "ServiceRequest" sr ON sr."id" = r."serviceRequestId"
        WHERE r."tenantId" IS NULL
      )
      UPDATE "ScheduledReminder" r
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE r."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
    BackfillStep {
        name: "ChatMessage from author",
        writes: "chat_messages",
        reads: &["users"],
        depends_on: &[],
        sql: r#"
      WITH source AS (
        SELECT c."id", u."tenantId" AS tenant_id
        FROM "chat_messages" c
        LEFT JOIN "users" u ON u."id" = c."userId"
        WHERE c."tenantId" IS NULL
      )
      UPDATE "chat_messages" c
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE c."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
    BackfillStep {
        name: "BookingSettings global cleanup",
        writes: "booking_settings",
        reads: &["Tenant"],
        depends_on: &[],
        sql: r#"
      WITH source AS (
        SELECT bs."id", t."id" AS tenant_id
        FROM "booking_settings" bs
        JOIN "Tenant" t ON t."id" = bs."tenantId"
        WHERE bs."tenantId" IS NULL
      )
      UPDATE "booking_settings" bs
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE bs."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
    BackfillStep {
        name: "IdempotencyKey from user scope",
        writes: "IdempotencyKey",
        reads: &["users"],
        depends_on: &[],
        sql: r#"
      WITH source AS (
        SELECT ik."id", u."tenantId" AS tenant_id
        FROM "IdempotencyKey" ik
        LEFT JOIN "users" u ON u."id" = ik."userId"
        WHERE ik."tenantId" IS NULL
      )
      UPDATE "IdempotencyKey" ik
      SET "tenantId" = source.tenant_id
      FROM source
      WHERE ik."id" = source."id" AND source.tenant_id IS NOT NULL"#,
    },
];

/// Stable topological order: declaration order wherever dependencies allow
pub fn order_steps(steps: &[BackfillStep]) -> Result<Vec<BackfillStep>, PlanError> {
    let mut names = HashSet::new();
    for step in steps {
        if !names.insert(step.name) {
            return Err(PlanError::DuplicateStep(step.name.to_string()));
        }
    }
    for step in steps {
        if let Some(missing) = step.depends_on.iter().find(|dep| !names.contains(*dep)) {
            return Err(PlanError::UnknownDependency {
                step: step.name.to_string(),
                dependency: missing.to_string(),
            });
        }
    }

    let mut emitted: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(steps.len());

    while ordered.len() < steps.len() {
        let next = steps.iter().find(|step| {
            !emitted.contains(step.name) && step.depends_on.iter().all(|dep| emitted.contains(dep))
        });

        match next {
            Some(step) => {
                emitted.insert(step.name);
                ordered.push(*step);
            }
            None => {
                let stuck = steps
                    .iter()
                    .filter(|step| !emitted.contains(step.name))
                    .map(|step| step.name.to_string())
                    .collect();
                return Err(PlanError::Cycle(stuck));
            }
        }
    }

    Ok(ordered)
}

/// `(reader, writer)` pairs where a step reads a table another step writes
/// without declaring the dependency
pub fn undeclared_reads(steps: &[BackfillStep]) -> Vec<(&'static str, &'static str)> {
    let mut missing = Vec::new();
    for reader in steps {
        for writer in steps {
            if reader.name == writer.name {
                continue;
            }
            if reader.reads.contains(&writer.writes) && !reader.depends_on.contains(&writer.name) {
                missing.push((reader.name, writer.name));
            }
        }
    }
    missing
}

/// Result of one backfill step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    Updated {
        name: String,
        row_count: u64,
        prerequisite_failed: Vec<String>,
    },
    Failed {
        name: String,
        error: String,
        prerequisite_failed: Vec<String>,
    },
}

impl BackfillOutcome {
    pub fn name(&self) -> &str {
        match self {
            BackfillOutcome::Updated { name, .. } | BackfillOutcome::Failed { name, .. } => name,
        }
    }
}

impl StepOutcome for BackfillOutcome {
    fn succeeded(&self) -> bool {
        matches!(self, BackfillOutcome::Updated { .. })
    }

    fn to_json(&self) -> Value {
        let (mut value, prerequisite_failed) = match self {
            BackfillOutcome::Updated {
                name,
                row_count,
                prerequisite_failed,
            } => (json!({ "name": name, "rowCount": row_count }), prerequisite_failed),
            BackfillOutcome::Failed {
                name,
                error,
                prerequisite_failed,
            } => (json!({ "name": name, "error": error }), prerequisite_failed),
        };
        if !prerequisite_failed.is_empty() {
            value["prerequisiteFailed"] = json!(prerequisite_failed);
        }
        value
    }
}

/// Run every step in dependency order. A failing step is recorded and the
/// batch moves on; steps whose prerequisite failed still run and say so.
pub async fn run_backfill(
    target: &mut dyn MigrationTarget,
    steps: &[BackfillStep],
) -> Result<BatchReport<BackfillOutcome>, PlanError> {
    let ordered = order_steps(steps)?;
    let mut failed: HashSet<&str> = HashSet::new();
    let mut outcomes = Vec::with_capacity(ordered.len());

    for step in ordered {
        let prerequisite_failed: Vec<String> = step
            .depends_on
            .iter()
            .filter(|dep| failed.contains(*dep))
            .map(|dep| dep.to_string())
            .collect();
        if !prerequisite_failed.is_empty() {
            warn!(
                "Backfill '{}' runs after failed prerequisite(s): {}",
                step.name,
                prerequisite_failed.join(", ")
            );
        }

        match target.execute_backfill(step.sql).await {
            Ok(row_count) => {
                info!("Backfill '{}': {} row(s) updated", step.name, row_count);
                outcomes.push(BackfillOutcome::Updated {
                    name: step.name.to_string(),
                    row_count,
                    prerequisite_failed,
                });
            }
            Err(e) => {
                warn!("Backfill '{}' failed: {}", step.name, e);
                failed.insert(step.name);
                outcomes.push(BackfillOutcome::Failed {
                    name: step.name.to_string(),
                    error: e.to_string(),
                    prerequisite_failed,
                });
            }
        }
    }

    Ok(BatchReport::new(outcomes))
}

/// NULL tenants left in each written table after a backfill pass
pub async fn remaining_null_counts(
    target: &mut dyn MigrationTarget,
    steps: &[BackfillStep],
) -> Vec<(&'static str, Result<i64, String>)> {
    let mut counts = Vec::with_capacity(steps.len());
    for step in steps {
        let count = target
            .count_null_tenant_rows(step.writes)
            .await
            .map_err(|e| e.to_string());
        counts.push((step.writes, count));
    }
    counts
}
