use super::json_stream;
use crate::api::AppState;
use crate::error::{DockerError, Result};
use crate::params::Params;
use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

/// Ping handler (GET and HEAD).
///
/// # Errors
///
/// Returns an error if the engine does not answer its own ping.
pub async fn ping(State(state): State<AppState>) -> Result<Response> {
    state.policy.ping().await?;
    Ok((
        [
            ("Api-Version", state.api_version.to_string()),
            ("Docker-Experimental", "false".to_string()),
            (
                header::CACHE_CONTROL.as_str(),
                "no-cache, no-store, must-revalidate".to_string(),
            ),
        ],
        "OK",
    )
        .into_response())
}

/// Engine version document.
///
/// # Errors
///
/// Returns an error if the engine call fails.
pub async fn get_version(State(state): State<AppState>) -> Result<Json<Value>> {
    Ok(Json(state.policy.version().await?))
}

/// Reduced system info.
///
/// # Errors
///
/// Returns an error if the engine call fails.
pub async fn get_info(State(state): State<AppState>) -> Result<Json<Value>> {
    Ok(Json(state.policy.info().await?))
}

/// Event stream restricted to owned resources.
///
/// # Errors
///
/// Returns an error if the engine refuses the subscription.
pub async fn events(State(state): State<AppState>, params: Params) -> Result<Response> {
    let stream = state.policy.events(params.pairs()).await?;
    Ok(json_stream(stream))
}

/// Anything outside the served subset.
pub async fn not_found() -> DockerError {
    DockerError::NotFound("page not found".to_string())
}
