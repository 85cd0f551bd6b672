pub mod audit;
pub mod discovery;
pub mod manager;

pub use audit::{
    audit_null_tenant_rows, count_null_tenant_rows, tenant_coverage, AuditRow, ColumnStatus, ExpectedTable,
    TenantCoverage, EXPECTED_TENANT_TABLES,
};
pub use discovery::{discover_tenant_tables, TenantScopedTable, TENANT_COLUMN};
pub use manager::{normalize_database_url, quote_identifier, DatabaseError, DatabaseManager};
