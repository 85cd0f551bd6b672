//! Own test binary: it sets process environment variables.

use tenant_guard::config::{resolve_database_url, AppConfig};
use tenant_guard::handlers::AppState;

#[test]
fn trigger_prefers_database_url_while_tools_prefer_netlify() {
    std::env::set_var("DATABASE_URL", "postgres://primary/app");
    std::env::set_var("NETLIFY_DATABASE_URL", "postgres://netlify/app");

    let config = AppConfig::from_env();
    let state = AppState::from_config(&config);

    assert_eq!(state.database_url.as_deref(), Some("postgres://primary/app"));
    assert_eq!(config.database.url.as_deref(), Some("postgres://netlify/app"));
    assert_eq!(resolve_database_url().as_deref(), Some("postgres://netlify/app"));

    std::env::remove_var("NETLIFY_DATABASE_URL");
    let state = AppState::from_config(&AppConfig::from_env());
    assert_eq!(state.database_url.as_deref(), Some("postgres://primary/app"));

    std::env::remove_var("DATABASE_URL");
    std::env::set_var("NETLIFY_DATABASE_URL", "neon://netlify/app");
    let state = AppState::from_config(&AppConfig::from_env());
    assert_eq!(state.database_url.as_deref(), Some("postgresql://netlify/app"));
}
