use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::database::discovery::{discover_tenant_tables, TENANT_COLUMN};
use crate::database::manager::{qualified_name, quote_identifier, DatabaseError};

/// NULL-tenant row count for one discovered table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub schema: String,
    pub table: String,
    pub null_count: i64,
}

impl AuditRow {
    pub fn is_offender(&self) -> bool {
        self.null_count > 0
    }
}

/// Rows of an audit that still hold NULL tenants
pub fn offenders(rows: &[AuditRow]) -> Vec<AuditRow> {
    rows.iter().filter(|row| row.is_offender()).cloned().collect()
}

/// Human-readable summary lines, matching what operators see in the CLI
pub fn summarize(rows: &[AuditRow]) -> Vec<String> {
    if rows.is_empty() {
        return vec!["No tenant tables detected during audit.".to_string()];
    }

    let offending = offenders(rows);
    if offending.is_empty() {
        return vec![
            "All tenant-scoped tables have tenantId populated. Ready to tighten policies.".to_string(),
        ];
    }

    let mut lines = vec!["Tables with NULL tenantId rows:".to_string()];
    lines.extend(
        offending
            .iter()
            .map(|row| format!("  - {}.{}: {}", row.schema, row.table, row.null_count)),
    );
    lines
}

/// Count NULL `tenantId` rows in a single table
pub async fn count_null_tenant_rows(pool: &PgPool, qualified_table: &str) -> Result<i64, DatabaseError> {
    let sql = format!(
        "SELECT COUNT(*)::bigint FROM {} WHERE {} IS NULL",
        qualified_table,
        quote_identifier(TENANT_COLUMN)
    );
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(count)
}

/// Discover tenant tables and count NULL tenants in each, one query at a time
pub async fn audit_null_tenant_rows(
    pool: &PgPool,
    schema: Option<&str>,
) -> Result<Vec<AuditRow>, DatabaseError> {
    let tables = discover_tenant_tables(pool, schema).await?;

    let mut results = Vec::with_capacity(tables.len());
    for table in tables {
        let null_count = count_null_tenant_rows(pool, &table.qualified()).await?;
        results.push(AuditRow {
            schema: table.schema,
            table: table.table,
            null_count,
        });
    }

    Ok(results)
}

/// Whether a table carries the tenant column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnStatus {
    Present,
    Missing,
}

impl ColumnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnStatus::Present => "present",
            ColumnStatus::Missing => "missing",
        }
    }
}

/// A table the coverage report checks, whether or not it has been scoped yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedTable {
    pub table: &'static str,
    pub expected: ColumnStatus,
    pub description: &'static str,
}

const fn scoped(table: &'static str, description: &'static str) -> ExpectedTable {
    ExpectedTable {
        table,
        expected: ColumnStatus::Present,
        description,
    }
}

pub const EXPECTED_TENANT_TABLES: [ExpectedTable; 11] = [
    scoped("services", "Service catalog entries"),
    scoped("ServiceRequest", "Client service requests"),
    scoped("Booking", "Bookings (column added, pending backfill)"),
    scoped("WorkOrder", "Operational work orders"),
    scoped("invoices", "Invoices"),
    scoped("expenses", "Expenses"),
    scoped("attachments", "Uploaded attachments"),
    scoped("ScheduledReminder", "Scheduled reminders"),
    scoped("chat_messages", "Chat transcripts"),
    scoped("booking_settings", "Tenant booking configuration"),
    scoped("IdempotencyKey", "Idempotency keys"),
];

/// Per-table coverage figures for the operator report. Counts are only
/// present when the tenant column exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantCoverage {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub column_status: ColumnStatus,
    pub expected: ColumnStatus,
    pub total_rows: Option<i64>,
    pub null_rows: Option<i64>,
    pub null_percentage: Option<f64>,
}

impl TenantCoverage {
    pub fn present(schema: &str, target: &ExpectedTable, total_rows: i64, null_rows: i64) -> Self {
        Self {
            schema: schema.to_string(),
            table: target.table.to_string(),
            column: TENANT_COLUMN.to_string(),
            column_status: ColumnStatus::Present,
            expected: target.expected,
            total_rows: Some(total_rows),
            null_rows: Some(null_rows),
            null_percentage: Some(null_percentage(total_rows, null_rows)),
        }
    }

    pub fn missing(schema: &str, target: &ExpectedTable) -> Self {
        Self {
            schema: schema.to_string(),
            table: target.table.to_string(),
            column: TENANT_COLUMN.to_string(),
            column_status: ColumnStatus::Missing,
            expected: target.expected,
            total_rows: None,
            null_rows: None,
            null_percentage: None,
        }
    }

    pub fn note(&self) -> Option<String> {
        match (self.column_status, self.null_rows) {
            (ColumnStatus::Missing, _) => Some("Column missing".to_string()),
            (ColumnStatus::Present, Some(nulls)) if nulls > 0 => Some(format!("{} rows require backfill", nulls)),
            _ => None,
        }
    }

    pub fn is_unexpectedly_missing(&self) -> bool {
        self.expected == ColumnStatus::Present && self.column_status == ColumnStatus::Missing
    }
}

/// Rows whose tenant column should exist but does not
pub fn unexpected_missing(rows: &[TenantCoverage]) -> Vec<&TenantCoverage> {
    rows.iter().filter(|row| row.is_unexpectedly_missing()).collect()
}

/// Percentage with two decimals; empty tables report 0
pub fn null_percentage(total_rows: i64, null_rows: i64) -> f64 {
    if total_rows <= 0 {
        return 0.0;
    }
    ((null_rows as i128 * 10_000) / total_rows as i128) as f64 / 100.0
}

const COLUMN_EXISTS_SQL: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2 AND column_name = $3
    )
"#;

pub async fn column_exists(pool: &PgPool, schema: &str, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let exists: bool = sqlx::query_scalar(COLUMN_EXISTS_SQL)
        .bind(schema)
        .bind(table)
        .bind(column)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Check every expected table in `schema`: column presence, then totals and
/// NULL tenants where the column exists
pub async fn tenant_coverage(
    pool: &PgPool,
    schema: &str,
    targets: &[ExpectedTable],
) -> Result<Vec<TenantCoverage>, DatabaseError> {
    let mut report = Vec::with_capacity(targets.len());
    for target in targets {
        if !column_exists(pool, schema, target.table, TENANT_COLUMN).await? {
            report.push(TenantCoverage::missing(schema, target));
            continue;
        }

        let qualified = qualified_name(schema, target.table);
        let total_sql = format!("SELECT COUNT(*)::bigint FROM {}", qualified);
        let total: i64 = sqlx::query_scalar(&total_sql).fetch_one(pool).await?;
        let nulls = count_null_tenant_rows(pool, &qualified).await?;
        report.push(TenantCoverage::present(schema, target, total, nulls));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: &str, null_count: i64) -> AuditRow {
        AuditRow {
            schema: "public".to_string(),
            table: table.to_string(),
            null_count,
        }
    }

    #[test]
    fn summary_for_empty_audit() {
        assert_eq!(summarize(&[]), vec!["No tenant tables detected during audit."]);
    }

    #[test]
    fn summary_lists_only_offenders() {
        let rows = vec![row("Booking", 0), row("WorkOrder", 3), row("invoices", 1)];
        let lines = summarize(&rows);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "  - public.WorkOrder: 3");
        assert_eq!(lines[2], "  - public.invoices: 1");
    }

    #[test]
    fn clean_audit_is_ready_to_tighten() {
        let lines = summarize(&[row("Booking", 0)]);
        assert!(lines[0].contains("Ready to tighten"));
    }

    #[test]
    fn percentage_is_truncated_to_two_decimals() {
        assert_eq!(null_percentage(0, 0), 0.0);
        assert_eq!(null_percentage(3, 1), 33.33);
        assert_eq!(null_percentage(8, 8), 100.0);
    }

    #[test]
    fn coverage_notes_missing_columns_and_pending_backfill() {
        let target = &EXPECTED_TENANT_TABLES[1];
        let missing = TenantCoverage::missing("public", target);
        assert_eq!(missing.note().as_deref(), Some("Column missing"));
        assert!(missing.is_unexpectedly_missing());
        assert_eq!(missing.total_rows, None);

        let pending = TenantCoverage::present("public", target, 3, 1);
        assert_eq!(pending.note().as_deref(), Some("1 rows require backfill"));
        assert_eq!(pending.null_percentage, Some(33.33));
        assert!(!pending.is_unexpectedly_missing());

        let clean = TenantCoverage::present("public", target, 0, 0);
        assert_eq!(clean.note(), None);
        assert_eq!(clean.null_percentage, Some(0.0));
    }

    #[test]
    fn only_expected_present_columns_count_as_unexpectedly_missing() {
        let optional = ExpectedTable {
            table: "legacy_notes",
            expected: ColumnStatus::Missing,
            description: "Not scoped",
        };
        let rows = vec![
            TenantCoverage::missing("public", &EXPECTED_TENANT_TABLES[0]),
            TenantCoverage::missing("public", &optional),
            TenantCoverage::present("public", &EXPECTED_TENANT_TABLES[2], 4, 0),
        ];
        let missing = unexpected_missing(&rows);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].table, "services");
    }

    #[test]
    fn coverage_serializes_status_in_lowercase() {
        let value = serde_json::to_value(TenantCoverage::missing("public", &EXPECTED_TENANT_TABLES[0])).unwrap();
        assert_eq!(value["columnStatus"], "missing");
        assert_eq!(value["expected"], "present");
        assert!(value["totalRows"].is_null());
    }

    #[test]
    fn audit_rows_serialize_camel_case() {
        let value = serde_json::to_value(row("Booking", 2)).unwrap();
        assert_eq!(value["nullCount"], 2);
    }
}
