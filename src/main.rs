use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::any::Any;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use tenant_guard::config;
use tenant_guard::handlers::{self, AppState};

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, MIGRATE_SECRET, etc.
    let _ = dotenvy::dotenv();

    let config = config::config();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.server.log_filter))
        .init();
    tracing::info!("Starting tenant-guard in {:?} mode", config.environment);

    if config.migrate.secret.is_none() {
        tracing::warn!("MIGRATE_SECRET is not set; the migration trigger will answer 500");
    }

    let app = app(AppState::from_config(config));

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("tenant-guard listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", e);
        std::process::exit(1);
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(handlers::router(state))
        // Global middleware
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": detail, "code": "INTERNAL_SERVER_ERROR" })),
    )
        .into_response()
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "tenant-guard",
            "version": version,
            "description": "Tenant backfill, NOT NULL migrations and RLS rollout",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "migrate": format!("/run-tenant-migrations, {} (requires x-migrate-secret)", handlers::FUNCTION_PATH),
            }
        }
    }))
}
