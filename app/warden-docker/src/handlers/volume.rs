use crate::api::AppState;
use crate::error::Result;
use crate::params::{Params, json_body};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::{Value, json};

/// List owned volumes. Engine warnings are not relayed.
///
/// # Errors
///
/// Returns an error if the engine call fails.
pub async fn list_volumes(State(state): State<AppState>, params: Params) -> Result<Json<Value>> {
    let volumes = state.policy.list_volumes(params.pairs()).await?;
    Ok(Json(json!({ "Volumes": volumes, "Warnings": [] })))
}

/// # Errors
///
/// Returns 400 for a malformed body, 403 if the name belongs to a volume
/// the gateway does not own.
pub async fn create_volume(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>)> {
    let request = match json_body::<Value>(&body, true)? {
        Value::Null => json!({}),
        request => request,
    };
    let created = state.policy.create_volume(&request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// # Errors
///
/// Returns 403 if the volume is not owned, or the engine's error.
pub async fn remove_volume(
    State(state): State<AppState>,
    Path(name): Path<String>,
    params: Params,
) -> Result<StatusCode> {
    state
        .policy
        .remove_volume(&name, params.flag("force"))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
