use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use super::error_response;
use crate::{middleware::admin_key::AdminAuth, models::service::ServiceDetail, AppState};

pub async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<BTreeSet<String>>, (StatusCode, Json<Value>)> {
    state
        .provisioning
        .list_services(None)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Schema name plus owner/oltp role rows (password hashes only).
pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceDetail>, (StatusCode, Json<Value>)> {
    state
        .provisioning
        .describe_service(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn put_service(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ServiceDetail>), (StatusCode, Json<Value>)> {
    let changed = state
        .provisioning
        .create_service(&id)
        .await
        .map_err(error_response)?;

    let detail = state
        .provisioning
        .describe_service(&id)
        .await
        .map_err(error_response)?;

    let status = if changed { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(detail)))
}
