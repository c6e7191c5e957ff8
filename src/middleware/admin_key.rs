use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use serde_json::{json, Value};

use crate::AppState;

/// Extractor guarding mutating routes. Compares the `X-Admin-Key` header with
/// `config.admin_key`; when no key is configured every request passes.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_key.as_deref() else {
            return Ok(AdminAuth);
        };

        let key = parts
            .headers
            .get("X-Admin-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Missing X-Admin-Key header" })),
            ))?;

        if key != expected {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid admin key" })),
            ));
        }

        Ok(AdminAuth)
    }
}
