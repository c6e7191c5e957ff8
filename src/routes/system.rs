use axum::{extract::State, http::StatusCode, Json};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};

use crate::AppState;

pub const API_VERSION: &str = "1.0";

/// GET / — empty body, lets load balancers check the listener.
pub async fn root() -> StatusCode {
    StatusCode::OK
}

pub async fn version() -> &'static str {
    API_VERSION
}

/// PUT on a collection path: the id segment is missing.
pub async fn missing_id() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({ "error": "An identifier is required" })),
    )
}

/// Probes the shared database through the connection registry.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = state.provisioning.admin_database();
    match state.provisioning.registry().acquire(database).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "db": "connected" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "db": e.to_string() })),
        ),
    }
}

/// GET /metrics — Prometheus scrape endpoint.
pub async fn metrics_handler() -> Result<String, StatusCode> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
