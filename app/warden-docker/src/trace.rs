//! Trace ID middleware for API requests.
//!
//! Every request gets an ID that is echoed in the `X-Trace-Id` response
//! header, recorded on the tracing span and stored in task-local storage so
//! the engine client can forward it on every engine call made for the
//! request.

use axum::extract::Request;
use axum::http::{self, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use warden_core::trace::CURRENT_TRACE_ID;

/// Header name for trace ID propagation.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Span for one API request. `trace_id` is filled in by
/// [`trace_id_middleware`].
pub fn request_span<B>(request: &http::Request<B>) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        trace_id = tracing::field::Empty,
    )
}

/// Reuses the caller's `X-Trace-Id` or generates a UUID v4.
pub async fn trace_id_middleware(request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

    tracing::Span::current().record("trace_id", trace_id.as_str());
    tracing::debug!(trace_id = %trace_id, method = %request.method(), uri = %request.uri(), "request");

    let mut response = CURRENT_TRACE_ID
        .scope(trace_id.clone(), next.run(request))
        .await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use axum::middleware;
    use axum::routing::get;
    use axum::{Router, response::IntoResponse};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn echo_trace_id() -> impl IntoResponse {
        warden_core::trace::current_trace_id()
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo_trace_id))
            .layer(middleware::from_fn(trace_id_middleware))
    }

    async fn header_and_body(req: HttpRequest<Body>) -> (String, String) {
        let resp = app().oneshot(req).await.unwrap();
        let header = resp
            .headers()
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (header, String::from_utf8_lossy(&body).to_string())
    }

    #[tokio::test]
    async fn caller_trace_id_is_reused() {
        let req = HttpRequest::builder()
            .uri("/")
            .header(TRACE_ID_HEADER, "trace-from-client")
            .body(Body::empty())
            .unwrap();
        let (header, body) = header_and_body(req).await;
        assert_eq!(header, "trace-from-client");
        assert_eq!(body, "trace-from-client");
    }

    #[test]
    fn request_span_declares_trace_id() {
        let req = HttpRequest::builder().uri("/_ping").body(()).unwrap();
        let span = request_span(&req);
        assert!(span.field("trace_id").is_some());
        assert!(span.field("method").is_some());
    }

    #[tokio::test]
    async fn trace_id_is_generated_when_missing() {
        let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let (header, body) = header_and_body(req).await;
        assert!(!header.is_empty());
        assert_eq!(body, header);
    }
}
