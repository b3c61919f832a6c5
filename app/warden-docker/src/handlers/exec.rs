use super::container::tty_size;
use super::read_body;
use crate::api::AppState;
use crate::error::Result;
use crate::hijack::hijack_response;
use crate::params::{Params, json_body};
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;
use warden_core::ExecSession;
use warden_core::types::{CreateResponse, ExecCreateRequest, ExecStartRequest};

/// Create an exec in an owned container.
///
/// # Errors
///
/// Returns 400 for a malformed body or an empty command, 403 if the
/// container is not owned.
pub async fn exec_create(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateResponse>)> {
    let request: ExecCreateRequest = json_body(&body, false)?;
    let created = state.policy.create_exec(&id, &request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Start an owned exec.
///
/// A detached start is a plain call. Otherwise the session is relayed; the
/// JSON body is consumed here so what follows on the connection is stdin.
///
/// # Errors
///
/// Returns 400 for a malformed body, 403 if the exec is not owned, or the
/// engine's error if the session cannot be opened.
pub async fn exec_start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request<Body>,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let start: ExecStartRequest = json_body(&read_body(body).await?, true)?;

    match state.policy.start_exec(&id, &start).await? {
        ExecSession::Detached => Ok(StatusCode::OK.into_response()),
        ExecSession::Attached(session) => {
            hijack_response(Request::from_parts(parts, Body::empty()), session)
        }
    }
}

/// # Errors
///
/// Returns 400 for a missing or non-numeric size, 403 if the exec is not
/// owned.
pub async fn exec_resize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Params,
) -> Result<StatusCode> {
    state.policy.resize_exec(&id, tty_size(&params)?).await?;
    Ok(StatusCode::OK)
}

/// # Errors
///
/// Returns 403 if the exec is not owned.
pub async fn exec_inspect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(Json(state.policy.inspect_exec(&id).await?))
}
