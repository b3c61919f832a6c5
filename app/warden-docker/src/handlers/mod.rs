//! Request handlers for the engine API surface.
//!
//! Handlers only decode the request and encode the answer. Every decision
//! about ownership and sandboxing is made by [`warden_core::Policy`].

use crate::error::{DockerError, Result};
use axum::body::Body;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use warden_core::ByteStream;

mod container;
mod exec;
mod image;
mod system;
mod volume;

pub use container::{
    attach_container, create_container, inspect_container, kill_container, list_containers,
    remove_container, resize_container, start_container, stop_container,
};
pub use exec::{exec_create, exec_inspect, exec_resize, exec_start};
pub use image::{build_image, image_get, image_post, list_images, pull_image};
pub use system::{events, get_info, get_version, not_found, ping};
pub use volume::{create_volume, list_volumes, remove_volume};

/// Credentials forwarded verbatim on pulls and pushes.
const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Registry credentials forwarded verbatim on builds.
const REGISTRY_CONFIG_HEADER: &str = "X-Registry-Config";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Streams newline-delimited JSON progress or events to the caller.
fn json_stream(stream: ByteStream) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Largest JSON body buffered in full, matching axum's default body limit.
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

async fn read_body(body: Body) -> Result<Bytes> {
    axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| DockerError::InvalidParameter(format!("failed to read request body: {e}")))
}
