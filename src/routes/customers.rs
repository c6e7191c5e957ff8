use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use super::error_response;
use crate::{middleware::admin_key::AdminAuth, models::customer::CustomerDetail, AppState};

pub async fn list_customers(
    State(state): State<AppState>,
) -> Result<Json<BTreeSet<String>>, (StatusCode, Json<Value>)> {
    state
        .provisioning
        .list_customers()
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CustomerDetail>, (StatusCode, Json<Value>)> {
    state
        .provisioning
        .describe_customer(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// 201 when anything was created, 200 when the tenant was already complete.
pub async fn put_customer(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CustomerDetail>), (StatusCode, Json<Value>)> {
    let changed = state
        .provisioning
        .create_customer(&id)
        .await
        .map_err(error_response)?;

    let detail = state
        .provisioning
        .describe_customer(&id)
        .await
        .map_err(error_response)?;

    let status = if changed { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(detail)))
}
