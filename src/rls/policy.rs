//! Tenant isolation policy SQL.
//!
//! The predicate reads `current_setting('app.current_tenant_id', true)`. With
//! the `missing_ok` flag set, an unset variable yields NULL instead of an
//! error, so a session that never sets a tenant matches no rows under the
//! strict policy. Setting the variable is the job of whichever layer hands
//! out tenant connections; [`set_tenant_context`] is the statement it should
//! run after checkout. Administrative connections that skip it see nothing
//! unless they are superusers (who bypass RLS entirely) or the table is not
//! yet forced and they own it.

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;

use crate::database::discovery::{TenantScopedTable, TENANT_COLUMN};
use crate::database::manager::{quote_identifier, DatabaseError};

/// The single policy name this crate manages on every tenant table
pub const POLICY_NAME: &str = "rls_tenant_isolation";

/// Session variable carrying the active tenant
pub const TENANT_SETTING: &str = "app.current_tenant_id";

/// How strict the isolation policy is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RlsPolicyConfig {
    pub allow_null_tenant: bool,
    pub force_rls: bool,
}

impl RlsPolicyConfig {
    pub const fn new(allow_null_tenant: bool, force_rls: bool) -> Self {
        Self {
            allow_null_tenant,
            force_rls,
        }
    }

    /// Forcing while NULL tenants are still allowed defeats the rollout order.
    /// Not rejected by the applier; phase tables are expected to respect it.
    pub const fn is_coherent(&self) -> bool {
        !(self.force_rls && self.allow_null_tenant)
    }
}

/// `USING` / `WITH CHECK` predicate
pub fn tenant_predicate(allow_null_tenant: bool) -> String {
    let column = quote_identifier(TENANT_COLUMN);
    let matches_session = format!("{} = current_setting('{}', true)", column, TENANT_SETTING);
    if allow_null_tenant {
        format!("({} IS NULL OR {})", column, matches_session)
    } else {
        format!("({})", matches_session)
    }
}

/// Ordered DDL for one table. Each statement commits on its own.
pub fn policy_statements(table: &TenantScopedTable, config: RlsPolicyConfig) -> Vec<String> {
    let qualified = table.qualified();
    let policy = quote_identifier(POLICY_NAME);
    let predicate = tenant_predicate(config.allow_null_tenant);

    let mut statements = vec![
        format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY", qualified),
        format!("DROP POLICY IF EXISTS {} ON {}", policy, qualified),
        format!(
            "CREATE POLICY {} ON {} USING {} WITH CHECK {}",
            policy, qualified, predicate, predicate
        ),
    ];

    if config.force_rls {
        statements.push(format!("ALTER TABLE {} FORCE ROW LEVEL SECURITY", qualified));
    }

    statements
}

/// Bind the session to a tenant for the rest of the connection's life
pub async fn set_tenant_context(conn: &mut PgConnection, tenant_id: &str) -> Result<(), DatabaseError> {
    sqlx::query("SELECT set_config($1, $2, false)")
        .bind(TENANT_SETTING)
        .bind(tenant_id)
        .execute(conn)
        .await?;
    Ok(())
}
