use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};

use crate::database::manager::DatabaseManager;
use crate::handlers::AppState;

/// GET /health - liveness plus a database round trip when one is configured
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let now = chrono::Utc::now();

    let Some(database_url) = state.database_url.as_deref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database not configured",
                "data": { "status": "degraded", "timestamp": now }
            })),
        );
    };

    match DatabaseManager::health_check(database_url).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
