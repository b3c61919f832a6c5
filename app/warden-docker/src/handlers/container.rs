use super::{REGISTRY_AUTH_HEADER, header_value};
use crate::api::AppState;
use crate::error::{DockerError, Result};
use crate::hijack::hijack_response;
use crate::params::{Params, json_body};
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;
use warden_core::types::{
    AttachOptions, ContainerCreateRequest, CreateResponse, RemoveOptions, TtySize,
};

/// List owned containers.
///
/// # Errors
///
/// Returns an error if the engine call fails.
pub async fn list_containers(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<Vec<Value>>> {
    Ok(Json(state.policy.list_containers(params.pairs()).await?))
}

/// Create a container under the sandbox rules.
///
/// # Errors
///
/// Returns 400 for a malformed body, 403 for a sandbox violation or an image
/// that cannot be obtained, or the engine's error.
pub async fn create_container(
    State(state): State<AppState>,
    params: Params,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateResponse>)> {
    let request: ContainerCreateRequest = json_body(&body, false)?;
    let created = state
        .policy
        .create_container(
            params.non_empty("name"),
            request,
            header_value(&headers, REGISTRY_AUTH_HEADER),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Inspect an owned container.
///
/// # Errors
///
/// Returns 403 if the container is not owned.
pub async fn inspect_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(Json(state.policy.inspect_container(&id).await?))
}

/// # Errors
///
/// Returns 403 if the container is not owned, or the engine's error.
pub async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.policy.start_container(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// # Errors
///
/// Returns 403 if the container is not owned, or the engine's error.
pub async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Params,
) -> Result<StatusCode> {
    state.policy.stop_container(&id, params.uint("t")?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// # Errors
///
/// Returns 403 if the container is not owned, or the engine's error.
pub async fn kill_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Params,
) -> Result<StatusCode> {
    state
        .policy
        .kill_container(&id, params.non_empty("signal"))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// # Errors
///
/// Returns 400 for a missing or non-numeric size, 403 if the container is
/// not owned.
pub async fn resize_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Params,
) -> Result<StatusCode> {
    state
        .policy
        .resize_container(&id, tty_size(&params)?)
        .await?;
    Ok(StatusCode::OK)
}

/// # Errors
///
/// Returns 403 if the container is not owned, or the engine's error.
pub async fn remove_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Params,
) -> Result<StatusCode> {
    let options = RemoveOptions {
        force: params.flag("force"),
        volumes: params.flag("v"),
        link: params.flag("link"),
    };
    state.policy.remove_container(&id, options).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Attach to an owned container and relay its stream.
///
/// # Errors
///
/// Returns 403 if the container is not owned, or the engine's error if the
/// session cannot be opened. Nothing is reported once the stream is relayed.
pub async fn attach_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Params,
    request: Request<Body>,
) -> Result<Response> {
    let options = AttachOptions {
        stream: params.flag("stream"),
        stdin: params.flag("stdin"),
        stdout: params.flag("stdout"),
        stderr: params.flag("stderr"),
        logs: params.flag("logs"),
        detach_keys: params.non_empty("detachKeys").map(str::to_owned),
    };
    let session = state.policy.attach_container(&id, &options).await?;
    hijack_response(request, session)
}

pub(super) fn tty_size(params: &Params) -> Result<TtySize> {
    let dimension = |key: &str| {
        u32::try_from(params.required_uint(key)?)
            .map_err(|_| DockerError::InvalidParameter(format!("{key} is out of range")))
    };
    Ok(TtySize {
        height: dimension("h")?,
        width: dimension("w")?,
    })
}
