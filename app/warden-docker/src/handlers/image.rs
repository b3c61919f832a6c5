use super::{REGISTRY_AUTH_HEADER, REGISTRY_CONFIG_HEADER, header_value, json_stream};
use crate::api::AppState;
use crate::error::{DockerError, Result};
use crate::params::Params;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use warden_core::types::BuildOptions;

/// List owned images.
///
/// # Errors
///
/// Returns an error if the engine call fails.
pub async fn list_images(
    State(state): State<AppState>,
    params: Params,
) -> Result<Json<Vec<Value>>> {
    Ok(Json(state.policy.list_images(params.pairs()).await?))
}

/// `POST /images/create`: pull with the caller's credentials.
///
/// # Errors
///
/// Returns 400 for imports or a missing `fromImage`, or the engine's error
/// if it refuses the pull before streaming.
pub async fn pull_image(
    State(state): State<AppState>,
    params: Params,
    headers: HeaderMap,
) -> Result<Response> {
    if params.non_empty("fromSrc").is_some() {
        return Err(DockerError::InvalidParameter(
            "Import is not supported".to_string(),
        ));
    }
    let progress = state
        .policy
        .pull_image(
            params.get("fromImage").unwrap_or_default(),
            params.non_empty("tag"),
            header_value(&headers, REGISTRY_AUTH_HEADER),
        )
        .await?;
    Ok(json_stream(progress))
}

/// `POST /build`: build from the tar context in the body.
///
/// # Errors
///
/// Returns 403 for host networking, or the engine's error if it refuses the
/// build before streaming.
pub async fn build_image(
    State(state): State<AppState>,
    params: Params,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let context = body
        .into_data_stream()
        .map_err(std::io::Error::other)
        .boxed();
    let progress = state
        .policy
        .build_image(
            BuildOptions { params: params.0 },
            header_value(&headers, REGISTRY_CONFIG_HEADER),
            context,
        )
        .await?;
    Ok(json_stream(progress))
}

/// `GET /images/{name}/json`. Image names contain slashes, so the route
/// captures the rest of the path and the suffix selects the operation.
///
/// # Errors
///
/// Returns 404 for an unknown suffix, 403 if the image is not owned.
pub async fn image_get(
    State(state): State<AppState>,
    Path(rest): Path<String>,
) -> Result<Response> {
    match rest.strip_suffix("/json") {
        Some(name) if !name.is_empty() => {
            Ok(Json(state.policy.inspect_image(name).await?).into_response())
        }
        _ => Err(page_not_found()),
    }
}

/// `POST /images/{name}/tag` and `POST /images/{name}/push`.
///
/// # Errors
///
/// Returns 404 for an unknown suffix, 403 if the source or pushed reference
/// is not owned.
pub async fn image_post(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    params: Params,
    headers: HeaderMap,
) -> Result<Response> {
    if let Some(source) = rest.strip_suffix("/tag").filter(|s| !s.is_empty()) {
        let repo = params
            .non_empty("repo")
            .ok_or_else(|| DockerError::InvalidParameter("repo is required".to_string()))?;
        state
            .policy
            .tag_image(source, repo, params.non_empty("tag"))
            .await?;
        return Ok(StatusCode::CREATED.into_response());
    }

    if let Some(reference) = rest.strip_suffix("/push").filter(|s| !s.is_empty()) {
        let (name, path_tag) = split_tag(reference);
        let tag = params.non_empty("tag").or(path_tag);
        let progress = state
            .policy
            .push_image(name, tag, header_value(&headers, REGISTRY_AUTH_HEADER))
            .await?;
        return Ok(json_stream(progress));
    }

    Err(page_not_found())
}

fn page_not_found() -> DockerError {
    DockerError::NotFound("page not found".to_string())
}

/// Splits `name:tag`. A colon before the last slash belongs to a registry
/// port, not a tag.
fn split_tag(reference: &str) -> (&str, Option<&str>) {
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let at = name_start + i;
            (&reference[..at], Some(&reference[at + 1..]))
        }
        None => (reference, None),
    }
}

#[cfg(test)]
mod tests {
    use super::split_tag;

    #[test]
    fn tags_split_off_the_last_path_segment_only() {
        assert_eq!(split_tag("alpine:3.19"), ("alpine", Some("3.19")));
        assert_eq!(split_tag("alpine"), ("alpine", None));
        assert_eq!(
            split_tag("localhost:5000/team/app"),
            ("localhost:5000/team/app", None)
        );
        assert_eq!(
            split_tag("localhost:5000/team/app:v2"),
            ("localhost:5000/team/app", Some("v2"))
        );
    }
}
