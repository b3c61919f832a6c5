//! Engine API router.
//!
//! Serves the restricted subset of the engine API, unversioned and under
//! every `/v1.{minor}` prefix clients commonly pin.

use crate::handlers;
use crate::trace::trace_id_middleware;
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use warden_core::Policy;

/// Lowest and highest `/v1.{minor}` prefixes routed.
const MIN_API_MINOR: u32 = 24;
const MAX_API_MINOR: u32 = 45;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Policy layer fronting the engine.
    pub policy: Policy,
    /// API version announced on ping.
    pub api_version: Arc<str>,
}

/// Creates the router with all served endpoints.
#[must_use]
pub fn create_router(policy: Policy, api_version: &str) -> Router {
    let state = AppState {
        policy,
        api_version: Arc::from(api_version),
    };

    let mut router = api_routes();
    for minor in MIN_API_MINOR..=MAX_API_MINOR {
        router = router.nest(&format!("/v1.{minor}"), api_routes());
    }

    router
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(trace_id_middleware))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/_ping", get(handlers::ping).head(handlers::ping))
        .route("/version", get(handlers::get_version))
        .route("/info", get(handlers::get_info))
        .route("/events", get(handlers::events))
        .route("/containers/json", get(handlers::list_containers))
        .route("/containers/create", post(handlers::create_container))
        .route("/containers/:id/json", get(handlers::inspect_container))
        .route("/containers/:id/start", post(handlers::start_container))
        .route("/containers/:id/stop", post(handlers::stop_container))
        .route("/containers/:id/kill", post(handlers::kill_container))
        .route("/containers/:id/resize", post(handlers::resize_container))
        .route("/containers/:id/attach", post(handlers::attach_container))
        .route("/containers/:id/exec", post(handlers::exec_create))
        .route("/containers/:id", delete(handlers::remove_container))
        .route("/exec/:id/start", post(handlers::exec_start))
        .route("/exec/:id/resize", post(handlers::exec_resize))
        .route("/exec/:id/json", get(handlers::exec_inspect))
        .route("/images/json", get(handlers::list_images))
        .route("/images/create", post(handlers::pull_image))
        .route(
            "/images/*name",
            get(handlers::image_get).post(handlers::image_post),
        )
        .route("/build", post(handlers::build_image))
        .route("/volumes", get(handlers::list_volumes))
        .route("/volumes/create", post(handlers::create_volume))
        .route("/volumes/:name", delete(handlers::remove_volume))
}
