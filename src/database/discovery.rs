use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::database::manager::{qualified_name, DatabaseError};

/// Column that marks a table as tenant scoped
pub const TENANT_COLUMN: &str = "tenantId";

/// A base table discovered to carry a `tenantId` column
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantScopedTable {
    pub schema: String,
    pub table: String,
}

impl TenantScopedTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Quoted `"schema"."table"` for use in DDL
    pub fn qualified(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }
}

impl std::fmt::Display for TenantScopedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

const DISCOVERY_SQL: &str = r#"
    SELECT c.table_schema::text AS table_schema, c.table_name::text AS table_name
    FROM information_schema.columns c
    JOIN information_schema.tables t
      ON t.table_schema = c.table_schema
     AND t.table_name = c.table_name
    WHERE c.column_name = $1
      AND t.table_type = 'BASE TABLE'
      AND c.table_schema NOT IN ('pg_catalog', 'information_schema')
      AND ($2::text IS NULL OR c.table_schema = $2)
    ORDER BY c.table_schema, c.table_name
"#;

/// Enumerate every tenant-scoped table, ordered by schema then table.
///
/// Always hits the catalog; errors come back untouched and nothing is retried.
pub async fn discover_tenant_tables(
    pool: &PgPool,
    schema: Option<&str>,
) -> Result<Vec<TenantScopedTable>, DatabaseError> {
    let rows: Vec<(String, String)> = sqlx::query_as(DISCOVERY_SQL)
        .bind(TENANT_COLUMN)
        .bind(schema)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(schema, table)| TenantScopedTable { schema, table })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_query_excludes_system_schemas() {
        assert!(DISCOVERY_SQL.contains("NOT IN ('pg_catalog', 'information_schema')"));
        assert!(DISCOVERY_SQL.contains("ORDER BY c.table_schema, c.table_name"));
    }

    #[test]
    fn qualified_names_are_quoted() {
        let table = TenantScopedTable::new("public", "ScheduledReminder");
        assert_eq!(table.qualified(), "\"public\".\"ScheduledReminder\"");
        assert_eq!(table.to_string(), "public.ScheduledReminder");
    }

    #[test]
    fn tables_sort_by_schema_then_name() {
        let mut tables = vec![
            TenantScopedTable::new("public", "invoices"),
            TenantScopedTable::new("archive", "invoices"),
            TenantScopedTable::new("public", "Booking"),
        ];
        tables.sort();
        assert_eq!(tables[0].schema, "archive");
        assert_eq!(tables[1].table, "Booking");
    }
}
