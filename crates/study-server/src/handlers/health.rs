use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::backend::{Db, Query, Table};
use crate::routes::AppState;

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/keep-alive
///
/// Runs the lightest possible read so an idle hosted backend stays awake.
pub async fn keep_alive(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db = Db::new(state.store.as_ref(), "");
    let probe = Query::table(Table::Profiles).limit(1);

    match db.fetch::<Value>(&probe).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "message": "Database is awake" })),
        ),
        Err(e) => {
            tracing::error!("Keep-alive query failed: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
        }
    }
}
