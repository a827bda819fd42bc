use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use crate::db::AppState;

/// Liveness plus a database round trip.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = state
        .db
        .get()
        .map(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok())
        .unwrap_or(false);

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ok": db_ok,
            "service": "paysettle",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.environment.as_ref(),
            "providers": state.gateways.providers(),
        })),
    )
}
